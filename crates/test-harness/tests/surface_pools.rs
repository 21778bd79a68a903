//! Surface pool tests against a recording framebuffer

use std::sync::Arc;

use surface::{
    BufferRequest, PixelFormat, ResourceId, Surface, SurfaceCaps, SurfaceConfig, SurfaceError, SurfacePool,
    SurfaceTypes, VideoMode,
};
use test_harness::fixtures::{framebuffer_pools, MockSession};
use test_harness::{DeviceCall, MockSettings};
use wm::types::WindowDescription;

const FB_SIZE: usize = 8 << 20;

fn modes() -> Vec<VideoMode> {
    vec![VideoMode::new(640, 480, 0), VideoMode::new(1024, 768, 0)]
}

fn primary(width: u32, height: u32, caps: SurfaceCaps) -> SurfaceConfig {
    SurfaceConfig::new(width, height, PixelFormat::Rgb16).with_caps(caps)
}

// ========== Primary layer tests ==========

#[test]
fn primary_buffer_without_mode_is_unsupported() -> anyhow::Result<()> {
    let (registry, fb, fbdev) = framebuffer_pools(FB_SIZE, modes())?;
    let before = fbdev.manager().stats();

    let result = Surface::new(
        &registry,
        primary(800, 480, SurfaceCaps::empty()),
        SurfaceTypes::LAYER,
        ResourceId::PRIMARY_LAYER,
    );

    assert!(matches!(result, Err(SurfaceError::Unsupported(_))), "got {result:?}");
    assert_eq!(fbdev.manager().stats().used_chunks, before.used_chunks);
    assert!(fb.mode_sets().is_empty(), "no mode may be set: {:?}", fb.calls());
    Ok(())
}

#[test]
fn primary_buffer_sets_matching_mode() -> anyhow::Result<()> {
    let (registry, fb, fbdev) = framebuffer_pools(FB_SIZE, modes())?;

    let surface = Surface::new(
        &registry,
        primary(1024, 768, SurfaceCaps::empty()),
        SurfaceTypes::LAYER,
        ResourceId::PRIMARY_LAYER,
    )?;

    assert_eq!(fb.mode_sets(), [(1024, 768)]);
    assert_eq!(surface.buffers()[0].placement.offset, 0);
    assert_eq!(surface.buffers()[0].placement.pitch, 2048);
    assert_eq!(fbdev.manager().stats().used_chunks, 0);
    Ok(())
}

#[test]
fn flipping_primary_sets_mode_on_back_buffer() -> anyhow::Result<()> {
    let (_registry, fb, fbdev) = framebuffer_pools(FB_SIZE, modes())?;
    let config = primary(640, 480, SurfaceCaps::FLIPPING | SurfaceCaps::DOUBLE);
    let request = |index| BufferRequest {
        config,
        types: SurfaceTypes::LAYER,
        resource_id: ResourceId::PRIMARY_LAYER,
        index,
    };

    let front = fbdev.allocate_buffer(&request(0))?;
    assert!(fb.mode_sets().is_empty(), "front buffer of a flipping layer sets no mode");
    let back = fbdev.allocate_buffer(&request(1))?;

    assert_eq!(fb.mode_sets(), [(640, 480)]);
    assert_eq!(front.offset, 0);
    assert_eq!(back.offset, 480 * 1280);
    Ok(())
}

#[test]
fn flip_pans_to_locked_buffer() -> anyhow::Result<()> {
    let (registry, fb, fbdev) = framebuffer_pools(FB_SIZE, modes())?;
    let surface = Surface::new(
        &registry,
        primary(640, 480, SurfaceCaps::DOUBLE),
        SurfaceTypes::LAYER,
        ResourceId::PRIMARY_LAYER,
    )?;

    let lock = surface.lock(1)?;
    fbdev.pan_display(&lock, surface::FlipFlags::WAIT, 0, 0)?;
    surface.unlock(1, &lock)?;

    assert_eq!(
        fb.calls().last(),
        Some(&DeviceCall::Pan {
            offset: 480 * 1280,
            x: 0,
            y: 0
        })
    );
    Ok(())
}

// ========== Negotiation tests ==========

#[test]
fn window_surfaces_prefer_video_memory() -> anyhow::Result<()> {
    let (registry, _fb, fbdev) = framebuffer_pools(FB_SIZE, modes())?;
    let fx = MockSession::with_pools(MockSettings::default(), registry)?;

    let window = fx.client().create_window(&WindowDescription::new(0, 0, 64, 64))?;
    assert_eq!(fbdev.manager().stats().used_chunks, 1);

    window.release()?;
    assert_eq!(fbdev.manager().stats().used_chunks, 0);
    Ok(())
}

#[test]
fn named_pool_serves_client_surface() -> anyhow::Result<()> {
    let (registry, _fb, fbdev) = framebuffer_pools(FB_SIZE, modes())?;
    let fx = MockSession::with_pools(MockSettings::default(), Arc::clone(&registry))?;
    let client = fx.client();

    let surface = client.create_surface(Some("system memory"), SurfaceConfig::new(32, 32, PixelFormat::Argb))?;
    assert_eq!(surface.size()?, (32, 32));
    assert_eq!(fbdev.manager().stats().used_chunks, 0);

    let missing = client.create_surface(Some("texture memory"), SurfaceConfig::new(8, 8, PixelFormat::Argb));
    assert!(matches!(missing, Err(wm::WmError::ItemNotFound(_))));
    Ok(())
}
