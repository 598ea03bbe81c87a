//! Per-frame scheduling: fence waits, image acquisition, uniform update,
//! command recording, submit, present, and swapchain recreation.

use ash::vk;
use log::{debug, info};

use super::error::{Error, Result};
use super::swapchain::SwapchainBundle;
use super::{Renderer, allocate_command_buffers, create_command_pool};
use crate::viewport::ViewportRect;

/// Renders one frame showing `rect`. A stale swapchain (resize, occlusion)
/// is recovered here by recreation; the next redraw retries. Anything else
/// is fatal and bubbles up to stop the event loop.
pub fn draw_frame(r: &mut Renderer, rect: &ViewportRect) -> Result<()> {
    match submit_frame(r, rect) {
        Ok(()) => Ok(()),
        Err(e) if e.is_transient() => {
            debug!("{}, recreating", e);
            recreate_swapchain(r)
        }
        Err(e) => Err(e),
    }
}

fn submit_frame(r: &mut Renderer, rect: &ViewportRect) -> Result<()> {
    let slot = r.tracker.slot();
    let frame = &r.frames.slots[slot];

    // The slot's previous submission must have fully retired before its
    // buffer, command buffer, and semaphores are touched again.
    unsafe {
        r.device
            .wait_for_fences(&[frame.in_flight], true, u64::MAX)
    }
    .map_err(Error::frame("wait for frame fence"))?;

    let image_index = match unsafe {
        r.swapchain.loader.acquire_next_image(
            r.swapchain.handle,
            u64::MAX,
            frame.image_available,
            vk::Fence::null(),
        )
    } {
        Ok((index, _suboptimal)) => index,
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            return Err(Error::SwapchainStale(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        Err(e) => return Err(Error::frame("acquire swapchain image")(e)),
    };

    // With more images than slots an image can come back while the slot that
    // last drew into it is still in flight; wait that slot out first.
    if let Some(owner) = r.tracker.claim(image_index as usize) {
        if owner != slot {
            unsafe {
                r.device
                    .wait_for_fences(&[r.frames.slots[owner].in_flight], true, u64::MAX)
            }
            .map_err(Error::frame("wait for image owner fence"))?;
        }
    }

    let frame = &r.frames.slots[slot];
    frame.write_rect(rect);

    unsafe { r.device.reset_fences(&[frame.in_flight]) }
        .map_err(Error::frame("reset frame fence"))?;

    record_commands(r, slot, image_index as usize)?;

    let frame = &r.frames.slots[slot];
    let wait_semaphores = [frame.image_available];
    let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
    let command_buffers = [r.command_buffers[slot]];
    let signal_semaphores = [frame.render_finished];
    let submit_info = vk::SubmitInfo::default()
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .command_buffers(&command_buffers)
        .signal_semaphores(&signal_semaphores);
    unsafe {
        r.device
            .queue_submit(r.graphics_queue, &[submit_info], frame.in_flight)
    }
    .map_err(Error::frame("submit draw commands"))?;

    let swapchains = [r.swapchain.handle];
    let image_indices = [image_index];
    let present_info = vk::PresentInfoKHR::default()
        .wait_semaphores(&signal_semaphores)
        .swapchains(&swapchains)
        .image_indices(&image_indices);
    match unsafe { r.swapchain.loader.queue_present(r.present_queue, &present_info) } {
        Ok(false) => {}
        Ok(true) => return Err(Error::SwapchainStale(vk::Result::SUBOPTIMAL_KHR)),
        Err(e @ (vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR)) => {
            return Err(Error::SwapchainStale(e));
        }
        Err(e) => return Err(Error::frame("present swapchain image")(e)),
    }

    r.tracker.advance();
    Ok(())
}

/// Re-records the slot's command buffer against the acquired image's
/// framebuffer. The commands are identical every frame except for the
/// framebuffer and extent; per-frame data flows through the uniform.
fn record_commands(r: &Renderer, slot: usize, image_index: usize) -> Result<()> {
    let device = &r.device;
    let cmd = r.command_buffers[slot];
    let extent = r.swapchain.extent;

    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .map_err(Error::frame("reset command buffer"))?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device
            .begin_command_buffer(cmd, &begin_info)
            .map_err(Error::frame("begin command buffer"))?;

        let clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        };
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(r.pipeline.render_pass)
            .framebuffer(r.swapchain.framebuffers[image_index])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(std::slice::from_ref(&clear_value));
        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, r.pipeline.pipeline);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));

        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            r.pipeline.pipeline_layout,
            0,
            &[r.frames.slots[slot].descriptor_set],
            &[],
        );
        // Two triangles covering the surface, generated in the vertex shader.
        device.cmd_draw(cmd, 6, 1, 0, 0);
        device.cmd_end_render_pass(cmd);
        device
            .end_command_buffer(cmd)
            .map_err(Error::frame("end command buffer"))?;
    }
    Ok(())
}

/// Drains the device, rebuilds the swapchain (handing the old handle to the
/// driver), and resets everything that referenced the retired images. The
/// render pass, pipeline, and frame slots all survive unchanged.
pub fn recreate_swapchain(r: &mut Renderer) -> Result<()> {
    if r.window_size.width == 0 || r.window_size.height == 0 {
        // Minimized. Nothing presentable until a real size arrives.
        return Ok(());
    }

    unsafe { r.device.device_wait_idle() }.map_err(Error::frame("wait idle for recreation"))?;

    r.swapchain.destroy_framebuffers(&r.device);
    r.swapchain.destroy_views(&r.device);

    let mut replacement = SwapchainBundle::new(
        &r.instance,
        &r.device,
        r.pdevice,
        r.surface,
        &r.surface_loader,
        (r.graphics_family, r.present_family),
        r.window_size,
        Some(r.swapchain.handle),
    )?;
    replacement.create_framebuffers(&r.device, r.pipeline.render_pass)?;
    let mut retired = std::mem::replace(&mut r.swapchain, replacement);
    retired.destroy_handle();

    // The old pool's buffers may still reference retired framebuffers.
    unsafe { r.device.destroy_command_pool(r.command_pool, None) };
    r.command_pool = create_command_pool(&r.device, r.graphics_family)?;
    r.command_buffers = allocate_command_buffers(&r.device, r.command_pool)?;

    r.tracker.reset_images(r.swapchain.images.len());
    info!(
        "swapchain recreated at {}x{}",
        r.swapchain.extent.width, r.swapchain.extent.height
    );
    Ok(())
}
