// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

pub const TRI_VERTS: &[Vertex] = &[
    // top (red)
    Vertex {
        pos: [0.0, 0.6, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    // left (green)
    Vertex {
        pos: [-0.5, -0.4, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    // right (blue)
    Vertex {
        pos: [0.5, -0.4, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];
pub const TRI_IDXS: &[u32] = &[0, 1, 2];

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CameraUbo {
    pub mvp: [[f32; 4]; 4],
}

impl CameraUbo {
    /// Model spun about +Z by `elapsed` seconds, seen from (2, 2, 2).
    pub fn spinning(elapsed: f32, aspect: f32) -> Self {
        let model = Mat4::from_rotation_z(elapsed * std::f32::consts::FRAC_PI_2);
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
        let proj = Mat4::perspective_rh(45f32.to_radians(), aspect.max(f32::EPSILON), 0.1, 10.0);
        Self {
            mvp: (proj * view * model).to_cols_array_2d(),
        }
    }
}

pub unsafe fn find_memory_type(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let mem = instance.get_physical_device_memory_properties(phys);
    (0..mem.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && mem.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or_else(|| anyhow!("no memory type with {req:?} in mask {type_bits:#b}"))
}

pub unsafe fn create_buffer_and_memory(
    instance: &ash::Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buf = device.create_buffer(&bci, None)?;
    let req = device.get_buffer_memory_requirements(buf);
    let mem_type = match find_memory_type(instance, phys, req.memory_type_bits, props) {
        Ok(t) => t,
        Err(e) => {
            device.destroy_buffer(buf, None);
            return Err(e);
        }
    };
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    let mem = match device.allocate_memory(&mai, None) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_buffer(buf, None);
            return Err(e.into());
        }
    };
    if let Err(e) = device.bind_buffer_memory(buf, mem, 0) {
        device.destroy_buffer(buf, None);
        device.free_memory(mem, None);
        return Err(e.into());
    }
    Ok((buf, mem))
}

/// One-shot staging upload: host->staging, then staging->dst (device-local).
/// Uses `queue` and a one-time command buffer from `cmd_pool`; waits until done.
pub unsafe fn upload_via_staging(
    instance: &ash::Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    queue: vk::Queue,
    cmd_pool: vk::CommandPool,
    dst: vk::Buffer,
    src_data: &[u8],
) -> Result<()> {
    let size = src_data.len() as vk::DeviceSize;
    let (staging, staging_mem) = create_buffer_and_memory(
        instance,
        device,
        phys,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    let result = copy_through(device, queue, cmd_pool, staging, staging_mem, dst, src_data);
    device.destroy_buffer(staging, None);
    device.free_memory(staging_mem, None);
    result
}

unsafe fn copy_through(
    device: &ash::Device,
    queue: vk::Queue,
    cmd_pool: vk::CommandPool,
    staging: vk::Buffer,
    staging_mem: vk::DeviceMemory,
    dst: vk::Buffer,
    src_data: &[u8],
) -> Result<()> {
    let size = src_data.len() as vk::DeviceSize;
    let ptr = device.map_memory(staging_mem, 0, size, vk::MemoryMapFlags::empty())?;
    std::ptr::copy_nonoverlapping(src_data.as_ptr(), ptr as *mut u8, src_data.len());
    device.unmap_memory(staging_mem);

    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: cmd_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device
        .allocate_command_buffers(&ai)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no staging command buffer allocated"))?;
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device.begin_command_buffer(cmd, &bi)?;
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    device.cmd_copy_buffer(cmd, staging, dst, std::slice::from_ref(&region));
    device.end_command_buffer(cmd)?;

    let si = vk::SubmitInfo {
        s_type: vk::StructureType::SUBMIT_INFO,
        command_buffer_count: 1,
        p_command_buffers: &cmd,
        ..Default::default()
    };
    let done = device
        .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
        .and_then(|_| device.queue_wait_idle(queue));
    device.free_command_buffers(cmd_pool, std::slice::from_ref(&cmd));
    Ok(done?)
}

/// Device-local vertex and index buffers for one indexed draw.
#[derive(Debug, Default)]
pub struct Mesh {
    pub vbuf: vk::Buffer,
    pub vmem: vk::DeviceMemory,
    pub ibuf: vk::Buffer,
    pub imem: vk::DeviceMemory,
    pub index_count: u32,
}

impl Mesh {
    pub unsafe fn upload(
        instance: &ash::Instance,
        device: &ash::Device,
        phys: vk::PhysicalDevice,
        queue: vk::Queue,
        cmd_pool: vk::CommandPool,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<Self> {
        let mut mesh = Mesh::default();
        let filled = mesh.fill(instance, device, phys, queue, cmd_pool, vertices, indices);
        if let Err(e) = filled {
            mesh.destroy(device);
            return Err(e);
        }
        Ok(mesh)
    }

    #[allow(clippy::too_many_arguments)]
    unsafe fn fill(
        &mut self,
        instance: &ash::Instance,
        device: &ash::Device,
        phys: vk::PhysicalDevice,
        queue: vk::Queue,
        cmd_pool: vk::CommandPool,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<()> {
        let vbytes: &[u8] = bytemuck::cast_slice(vertices);
        let ibytes: &[u8] = bytemuck::cast_slice(indices);

        (self.vbuf, self.vmem) = create_buffer_and_memory(
            instance,
            device,
            phys,
            vbytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .context("vertex buffer")?;
        (self.ibuf, self.imem) = create_buffer_and_memory(
            instance,
            device,
            phys,
            ibytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .context("index buffer")?;

        upload_via_staging(instance, device, phys, queue, cmd_pool, self.vbuf, vbytes)
            .context("upload vertices")?;
        upload_via_staging(instance, device, phys, queue, cmd_pool, self.ibuf, ibytes)
            .context("upload indices")?;
        self.index_count = indices.len() as u32;
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_buffer(self.ibuf, None);
        device.free_memory(self.imem, None);
        device.destroy_buffer(self.vbuf, None);
        device.free_memory(self.vmem, None);
        *self = Mesh::default();
    }
}

pub unsafe fn create_camera_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    Ok(device.create_descriptor_set_layout(&ci, None)?)
}

/// One host-visible camera UBO and descriptor set per swapchain image.
///
/// Indexed by image rather than by frame slot: an image's buffer is only
/// rewritten once no in-flight frame references that image.
#[derive(Debug, Default)]
pub struct FrameUniforms {
    buffers: Vec<vk::Buffer>,
    memories: Vec<vk::DeviceMemory>,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl FrameUniforms {
    pub unsafe fn create(
        instance: &ash::Instance,
        device: &ash::Device,
        phys: vk::PhysicalDevice,
        set_layout: vk::DescriptorSetLayout,
        image_count: usize,
    ) -> Result<Self> {
        let mut uniforms = FrameUniforms::default();
        if let Err(e) = uniforms.fill(instance, device, phys, set_layout, image_count) {
            uniforms.destroy(device);
            return Err(e);
        }
        Ok(uniforms)
    }

    unsafe fn fill(
        &mut self,
        instance: &ash::Instance,
        device: &ash::Device,
        phys: vk::PhysicalDevice,
        set_layout: vk::DescriptorSetLayout,
        image_count: usize,
    ) -> Result<()> {
        let ubo_size = std::mem::size_of::<CameraUbo>() as vk::DeviceSize;

        for _ in 0..image_count {
            let (b, m) = create_buffer_and_memory(
                instance,
                device,
                phys,
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .context("camera UBO")?;
            self.buffers.push(b);
            self.memories.push(m);
        }

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: image_count as u32,
        }];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: image_count as u32,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        self.pool = device.create_descriptor_pool(&pool_ci, None)?;

        let layouts = vec![set_layout; image_count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool,
            descriptor_set_count: image_count as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.sets = device.allocate_descriptor_sets(&alloc)?;

        let infos: Vec<vk::DescriptorBufferInfo> = self
            .buffers
            .iter()
            .map(|&buffer| vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range: ubo_size,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = self
            .sets
            .iter()
            .zip(&infos)
            .map(|(&dst_set, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        device.update_descriptor_sets(&writes, &[]);
        Ok(())
    }

    pub fn sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }

    pub unsafe fn write(
        &self,
        device: &ash::Device,
        image_index: usize,
        data: &CameraUbo,
    ) -> Result<()> {
        let mem = *self
            .memories
            .get(image_index)
            .ok_or_else(|| anyhow!("no camera UBO for image {image_index}"))?;
        let bytes = bytemuck::bytes_of(data);
        let ptr = device.map_memory(
            mem,
            0,
            bytes.len() as vk::DeviceSize,
            vk::MemoryMapFlags::empty(),
        )?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        device.unmap_memory(mem);
        Ok(())
    }

    /// Sets go with the pool.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
        for (&b, &m) in self.buffers.iter().zip(&self.memories) {
            device.destroy_buffer(b, None);
            device.free_memory(m, None);
        }
        *self = FrameUniforms::default();
    }
}
