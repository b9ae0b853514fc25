// SPDX-License-Identifier: CEPL-1.0
mod common;

use cadence_render::{
    FrameStatus, RecreateReason, RecreateStatus, RecreationController, RecreationState,
    RenderSize,
};
use common::{sim_loop, Event, ScriptedAcquire, SimDevice, SimProbe, SimTarget};

const MINIMIZED: RenderSize = RenderSize::new(0, 0);
const RESTORED: RenderSize = RenderSize::new(800, 600);

#[test]
fn minimized_window_blocks_until_restored() {
    common::init_logs();
    let (mut frames, gpu) = sim_loop(2, 3);
    {
        let mut g = gpu.borrow_mut();
        g.sizes = [MINIMIZED, RESTORED].into();
        g.acquire_script.push_back(ScriptedAcquire::OutOfDate);
    }

    let status = frames.draw_frame().expect("frame");
    let FrameStatus::Recreated(summary) = status else {
        panic!("expected a rebuild, got {status:?}");
    };
    assert_eq!(summary.extent, RESTORED);

    let g = gpu.borrow();
    let tail: Vec<&Event> = g
        .events
        .iter()
        .skip_while(|e| **e != Event::AcquireOutOfDate)
        .skip(1)
        .collect();
    assert_eq!(
        tail,
        vec![
            &Event::ProbeSize(MINIMIZED),
            &Event::WaitEvents,
            &Event::ProbeSize(RESTORED),
            &Event::WaitIdle,
            &Event::Rebuild(RESTORED),
        ]
    );
}

#[test]
fn minimized_window_defers_when_platform_cannot_block() {
    common::init_logs();
    let (mut frames, gpu) = sim_loop(2, 3);
    {
        let mut g = gpu.borrow_mut();
        g.probe_blocks = false;
        g.sizes = [MINIMIZED].into();
        g.acquire_script.push_back(ScriptedAcquire::OutOfDate);
    }

    assert_eq!(frames.draw_frame().expect("frame"), FrameStatus::Paused);
    assert_eq!(frames.recreation().state(), RecreationState::Draining);
    // Still minimized: no acquire, no device barrier.
    assert_eq!(frames.draw_frame().expect("frame"), FrameStatus::Paused);
    {
        let g = gpu.borrow();
        assert_eq!(g.count(|e| matches!(e, Event::Acquire(_))), 0);
        assert_eq!(g.count(|e| *e == Event::WaitIdle), 0);
    }

    gpu.borrow_mut().sizes = [RESTORED].into();
    assert!(matches!(
        frames.draw_frame().expect("frame"),
        FrameStatus::Recreated(s) if s.extent == RESTORED
    ));
    assert_eq!(frames.recreation().state(), RecreationState::Active);
    assert!(matches!(
        frames.draw_frame().expect("frame"),
        FrameStatus::Presented { .. }
    ));
}

#[test]
fn surface_at_zero_area_during_rebuild_pauses_instead_of_failing() {
    common::init_logs();
    let (mut frames, gpu) = sim_loop(2, 3);
    {
        let mut g = gpu.borrow_mut();
        // The window reports a size, then minimizes before the swapchain is made.
        g.zero_area_rebuilds = 1;
        g.acquire_script.push_back(ScriptedAcquire::OutOfDate);
    }

    assert_eq!(frames.draw_frame().expect("frame"), FrameStatus::Paused);
    assert_eq!(frames.recreation().state(), RecreationState::Draining);
    assert_eq!(frames.recreation().rebuild_count(), 0);
    {
        let g = gpu.borrow();
        assert_eq!(g.count(|e| *e == Event::RebuildSkipped), 1);
        assert_eq!(g.count(|e| matches!(e, Event::Rebuild(_))), 0);
        assert!(!g.target_destroyed);
    }

    assert!(matches!(
        frames.draw_frame().expect("frame"),
        FrameStatus::Recreated(s) if s.extent == RenderSize::new(1280, 720)
    ));
    assert_eq!(frames.recreation().state(), RecreationState::Active);
    presented_without_rebuild(&mut frames, &gpu);
}

#[test]
fn resize_while_paused_is_folded_into_the_pending_rebuild() {
    common::init_logs();
    let (mut frames, gpu) = sim_loop(2, 3);
    {
        let mut g = gpu.borrow_mut();
        g.probe_blocks = false;
        g.sizes = [MINIMIZED].into();
        g.acquire_script.push_back(ScriptedAcquire::OutOfDate);
    }
    let signal = cadence_render::Renderer::resize_signal(&frames);

    assert_eq!(frames.draw_frame().expect("frame"), FrameStatus::Paused);
    gpu.borrow_mut().sizes = [RESTORED].into();
    signal.notify();

    assert!(matches!(
        frames.draw_frame().expect("frame"),
        FrameStatus::Recreated(_)
    ));
    assert!(!signal.is_raised());
    presented_without_rebuild(&mut frames, &gpu);
}

fn presented_without_rebuild(frames: &mut common::SimLoop, gpu: &common::Gpu) {
    let before = gpu.borrow().count(|e| matches!(e, Event::Rebuild(_)));
    assert!(matches!(
        frames.draw_frame().expect("frame"),
        FrameStatus::Presented { .. }
    ));
    assert_eq!(gpu.borrow().count(|e| matches!(e, Event::Rebuild(_))), before);
}

#[test]
fn controller_walks_through_its_states() {
    common::init_logs();
    let gpu = common::gpu(3);
    let device = SimDevice { gpu: gpu.clone() };
    let mut target = SimTarget { gpu: gpu.clone() };
    let mut probe = SimProbe { gpu: gpu.clone() };
    gpu.borrow_mut().probe_blocks = false;
    gpu.borrow_mut().sizes = [MINIMIZED].into();

    let mut controller = RecreationController::new();
    assert_eq!(controller.state(), RecreationState::Active);
    assert!(!controller.is_pending());

    controller.request(RecreateReason::SubOptimal);
    assert_eq!(controller.state(), RecreationState::Draining);
    // A second request while pending changes nothing.
    controller.request(RecreateReason::Resized);
    assert_eq!(controller.state(), RecreationState::Draining);

    let status = controller
        .run(&device, &mut target, &mut probe)
        .expect("deferred");
    assert_eq!(status, RecreateStatus::Deferred);
    assert!(controller.is_pending());
    assert_eq!(controller.rebuild_count(), 0);
    assert_eq!(controller.last_summary(), None);

    gpu.borrow_mut().sizes = [RESTORED].into();
    let status = controller
        .run(&device, &mut target, &mut probe)
        .expect("rebuilt");
    let RecreateStatus::Rebuilt(summary) = status else {
        panic!("expected a rebuild");
    };
    assert_eq!(summary.extent, RESTORED);
    assert_eq!(controller.state(), RecreationState::Active);
    assert_eq!(controller.rebuild_count(), 1);
    assert_eq!(controller.last_summary(), Some(summary));
}
