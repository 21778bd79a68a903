//! Client interface tests
//!
//! Client handles work in inset-free coordinates. These tests check the
//! translation against the internal bounds, the reference counting of the
//! handles and which calls reach the backend.

use test_harness::assertions::{assert_backend_untouched, assert_called_once, assert_not_called, assert_stack_order};
use test_harness::fixtures::{client_window, MockSession};
use test_harness::{BackendCall, MockOp, MockSettings};
use wm::types::{
    ConfigFlags, Grab, Insets, PropertyValue, Rect, Restack, WindowCaps, WindowDescription, WindowEventType,
    WindowOptions,
};
use wm::WmError;

fn decorated() -> MockSettings {
    MockSettings::default().with_insets(Insets::new(5, 3, 5, 3))
}

// ========== Geometry tests ==========

#[test]
fn insets_surround_client_area() -> anyhow::Result<()> {
    let fx = MockSession::new(decorated())?;
    let window = client_window(&fx.client(), 10, 20, 100, 50)?;

    assert_eq!(window.position()?, (10, 20));
    assert_eq!(window.size()?, (100, 50));
    assert_eq!(fx.stack()?.bounds_of(window.id()?), Some(Rect::new(15, 23, 110, 56)));
    assert_eq!(window.surface()?.size()?, (100, 50));
    Ok(())
}

#[test]
fn move_to_round_trips_through_insets() -> anyhow::Result<()> {
    let fx = MockSession::new(decorated())?;
    let window = client_window(&fx.client(), 0, 0, 64, 64)?;

    window.move_to(200, 100)?;
    assert_eq!(window.position()?, (200, 100));
    window.move_by(-50, 7)?;
    assert_eq!(window.position()?, (150, 107));
    Ok(())
}

#[test]
fn resize_keeps_surface_at_client_size() -> anyhow::Result<()> {
    let fx = MockSession::new(decorated())?;
    let window = client_window(&fx.client(), 0, 0, 64, 64)?;

    window.resize(120, 80)?;
    assert_eq!(window.size()?, (120, 80));
    assert_eq!(window.surface()?.size()?, (120, 80));
    assert_eq!(fx.stack()?.bounds_of(window.id()?), Some(Rect::new(5, 3, 130, 86)));
    Ok(())
}

#[test]
fn rejected_resize_keeps_surface_size() -> anyhow::Result<()> {
    let settings = MockSettings::default().rejecting(MockOp::SetWindowConfig, WmError::Failure("no".into()));
    let fx = MockSession::new(settings)?;
    let window = client_window(&fx.client(), 0, 0, 32, 32)?;

    assert_eq!(window.resize(64, 48).unwrap_err(), WmError::Failure("no".into()));
    assert_eq!(window.size()?, (32, 32));
    assert_eq!(window.surface()?.size()?, (32, 32));

    assert!(window.set_bounds(4, 4, 48, 48).is_err());
    assert_eq!(window.position()?, (0, 0));
    assert_eq!(window.surface()?.size()?, (32, 32));
    Ok(())
}

#[test]
fn geometry_overflow_is_invalid() -> anyhow::Result<()> {
    let fx = MockSession::new(decorated())?;
    let client = fx.client();
    let window = client_window(&client, 0, 0, 16, 16)?;

    assert!(matches!(window.move_to(i32::MAX, 0), Err(WmError::InvalidArgument(_))));
    assert!(matches!(window.set_bounds(0, i32::MAX - 1, 16, 16), Err(WmError::InvalidArgument(_))));
    assert!(matches!(window.move_by(i32::MAX, 0), Err(WmError::InvalidArgument(_))));
    assert_eq!(window.position()?, (0, 0));

    let result = client.create_window(&WindowDescription::new(i32::MAX, 0, 16, 16));
    assert!(matches!(result, Err(WmError::InvalidArgument(_))));
    assert_called_once(&fx.backend, "PreconfigureWindow", |c| {
        matches!(c, BackendCall::PreconfigureWindow { .. })
    });
    assert_eq!(fx.stack()?.lock().window_count(), 1);
    Ok(())
}

#[test]
fn zero_move_skips_backend() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 64, 64)?;
    fx.backend.clear_calls();

    window.move_by(0, 0)?;
    assert_backend_untouched(&fx.backend);
    Ok(())
}

#[test]
fn out_of_range_sizes_never_reach_backend() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 64, 64)?;
    fx.backend.clear_calls();

    for (w, h) in [(0, 10), (10, 0), (4097, 10), (10, 4097), (-1, -1)] {
        assert!(matches!(window.resize(w, h), Err(WmError::InvalidArgument(_))), "resize {w}x{h}");
        assert!(matches!(window.set_bounds(0, 0, w, h), Err(WmError::InvalidArgument(_))));
        assert!(matches!(window.resize_surface(w, h), Err(WmError::InvalidArgument(_))));
    }
    assert_backend_untouched(&fx.backend);
    Ok(())
}

#[test]
fn bound_window_follows_parent() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let client = fx.client();
    let parent = client_window(&client, 0, 0, 100, 100)?;
    let child = client_window(&client, 0, 0, 20, 20)?;

    parent.bind(&child, 10, 15)?;
    assert_eq!(child.position()?, (10, 15));
    parent.move_to(50, 50)?;
    assert_eq!(child.position()?, (60, 65));

    parent.unbind(&child)?;
    parent.move_to(0, 0)?;
    assert_eq!(child.position()?, (60, 65));
    assert!(matches!(parent.unbind(&child), Err(WmError::ItemNotFound(_))));
    Ok(())
}

// ========== Property tests ==========

#[test]
fn property_round_trip() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;

    assert_eq!(window.set_property("title", "first")?, None);
    assert_eq!(window.property("title")?, PropertyValue::from("first"));
    assert_eq!(window.set_property("title", "second")?, Some(PropertyValue::from("first")));
    assert_eq!(window.remove_property("title")?, PropertyValue::from("second"));
    assert!(matches!(window.property("title"), Err(WmError::ItemNotFound(_))));

    let id = window.id()?;
    assert_called_once(&fx.backend, "RemoveProperty", |c| {
        *c == BackendCall::RemoveProperty {
            window: id,
            key: "title".into(),
        }
    });
    Ok(())
}

// ========== Configuration tests ==========

#[test]
fn opacity_is_forwarded_once() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;
    let id = window.id()?;
    assert_eq!(window.opacity()?, 0);

    window.set_opacity(0xff)?;
    window.set_opacity(0xff)?;
    assert_eq!(window.opacity()?, 0xff);
    assert_called_once(&fx.backend, "SetWindowConfig(OPACITY)", |c| {
        *c == BackendCall::SetWindowConfig {
            window: id,
            flags: ConfigFlags::OPACITY,
        }
    });
    Ok(())
}

#[test]
fn opaque_region_must_not_be_inverted() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;

    window.set_opaque_region(0, 0, 15, 15)?;
    assert!(matches!(window.set_opaque_region(10, 0, 5, 15), Err(WmError::InvalidArgument(_))));
    assert!(matches!(window.set_opaque_region(0, 10, 15, 5), Err(WmError::InvalidArgument(_))));
    Ok(())
}

#[test]
fn alpha_option_requires_alpha_channel() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let client = fx.client();
    let plain = client_window(&client, 0, 0, 16, 16)?;
    let alpha = client.create_window(&WindowDescription::new(0, 0, 16, 16).with_caps(WindowCaps::ALPHACHANNEL))?;

    plain.set_options(WindowOptions::ALPHACHANNEL | WindowOptions::KEEP_POSITION)?;
    alpha.set_options(WindowOptions::ALPHACHANNEL)?;
    assert_eq!(plain.options()?, WindowOptions::KEEP_POSITION);
    assert_eq!(alpha.options()?, WindowOptions::ALPHACHANNEL);
    Ok(())
}

#[test]
fn rotation_is_normalized() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;
    let stack = fx.stack()?;

    window.set_rotation(-90)?;
    let id = window.id()?;
    assert_eq!(stack.lock().window(id).map(|w| w.config().rotation), Some(270));
    window.set_rotation(720)?;
    assert_eq!(stack.lock().window(id).map(|w| w.config().rotation), Some(0));
    Ok(())
}

// ========== Stacking and input tests ==========

#[test]
fn restacking_goes_through_backend() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let client = fx.client();
    let a = client_window(&client, 0, 0, 16, 16)?;
    let b = client_window(&client, 0, 0, 16, 16)?;
    let stack = fx.stack()?;
    let (a_id, b_id) = (a.id()?, b.id()?);
    assert_stack_order(&stack, &[b_id, a_id]);

    a.raise_to_top()?;
    assert_stack_order(&stack, &[a_id, b_id]);
    a.put_below(&b)?;
    assert_stack_order(&stack, &[b_id, a_id]);
    assert_called_once(&fx.backend, "RestackWindow(Below)", |c| {
        *c == BackendCall::RestackWindow {
            window: a_id,
            restack: Restack::Below(b_id),
        }
    });
    Ok(())
}

#[test]
fn grabs_are_forwarded() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;
    let id = window.id()?;

    window.grab_keyboard()?;
    window.grab_key(0x41, 0)?;
    window.ungrab_keyboard()?;
    assert_called_once(&fx.backend, "Grab(Keyboard)", |c| {
        *c == BackendCall::Grab {
            window: id,
            grab: Grab::Keyboard,
        }
    });
    assert_called_once(&fx.backend, "Grab(Key)", |c| {
        *c == BackendCall::Grab {
            window: id,
            grab: Grab::Key {
                symbol: 0x41,
                modifiers: 0,
            },
        }
    });
    assert_called_once(&fx.backend, "Ungrab(Keyboard)", |c| {
        *c == BackendCall::Ungrab {
            window: id,
            grab: Grab::Keyboard,
        }
    });
    Ok(())
}

#[test]
fn ghost_window_cannot_take_focus() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;
    window.set_opacity(0xff)?;
    window.set_options(WindowOptions::GHOST)?;

    assert!(matches!(window.request_focus(), Err(WmError::Unsupported(_))));
    assert_not_called(&fx.backend, "RequestFocus", |c| matches!(c, BackendCall::RequestFocus { .. }));

    window.set_options(WindowOptions::empty())?;
    window.request_focus()?;
    assert_called_once(&fx.backend, "RequestFocus", |c| matches!(c, BackendCall::RequestFocus { .. }));
    Ok(())
}

#[test]
fn input_only_window_has_no_surface() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = fx
        .client()
        .create_window(&WindowDescription::new(0, 0, 16, 16).with_caps(WindowCaps::INPUTONLY))?;

    assert!(matches!(window.surface(), Err(WmError::Unsupported(_))));
    assert!(matches!(window.set_color_key(0, 0, 0), Err(WmError::Unsupported(_))));
    Ok(())
}

// ========== Event tests ==========

#[test]
fn close_posts_close_event() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;
    let buffer = window.create_event_buffer()?;

    window.close()?;
    let event = buffer.next_event()?.ok_or_else(|| anyhow::anyhow!("no event"))?;
    assert_eq!(event.kind, WindowEventType::CLOSE);
    assert_eq!(event.window, window.id()?);
    assert!(!window.window().is_destroyed(), "close only asks");
    Ok(())
}

#[test]
fn disabled_events_are_filtered() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;
    let buffer = window.create_event_buffer()?;

    window.disable_events(WindowEventType::POSITION)?;
    window.move_to(5, 5)?;
    window.resize(20, 20)?;
    let event = buffer.next_event()?.ok_or_else(|| anyhow::anyhow!("no event"))?;
    assert_eq!(event.kind, WindowEventType::SIZE);
    assert_eq!(buffer.next_event()?, None);
    Ok(())
}

#[test]
fn destroy_tears_down_once() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;
    let buffer = window.create_event_buffer()?;
    let id = window.id()?;

    window.destroy()?;
    let event = buffer.next_event()?.ok_or_else(|| anyhow::anyhow!("no event"))?;
    assert_eq!(event.kind, WindowEventType::DESTROYED);

    assert!(matches!(window.destroy(), Err(WmError::Destroyed)));
    assert!(matches!(window.move_to(1, 1), Err(WmError::Destroyed)));
    window.release()?;
    assert_called_once(&fx.backend, "RemoveWindow", |c| {
        matches!(c, BackendCall::RemoveWindow { window, .. } if *window == id)
    });
    Ok(())
}

#[test]
fn indestructible_window_refuses_destroy() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;
    window.set_options(WindowOptions::INDESTRUCTIBLE)?;

    assert!(matches!(window.destroy(), Err(WmError::Unsupported(_))));
    assert_not_called(&fx.backend, "RemoveWindow", |c| matches!(c, BackendCall::RemoveWindow { .. }));
    Ok(())
}

// ========== Reference counting tests ==========

#[test]
fn last_release_removes_window() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let window = client_window(&fx.client(), 0, 0, 16, 16)?;
    let removed = |backend: &test_harness::MockBackend| {
        backend.count(|c| matches!(c, BackendCall::RemoveWindow { .. }))
    };

    // Creation hands out the first reference
    for _ in 1..4 {
        window.add_ref()?;
    }
    for _ in 1..4 {
        window.release()?;
        assert_eq!(removed(&fx.backend), 0, "removed before the last release");
    }
    window.release()?;
    assert_eq!(removed(&fx.backend), 1);

    assert!(matches!(window.release(), Err(WmError::Destroyed)));
    assert!(matches!(window.add_ref(), Err(WmError::Destroyed)));
    assert_eq!(removed(&fx.backend), 1);
    Ok(())
}

#[test]
fn release_drops_cursor_after_surface_error() -> anyhow::Result<()> {
    let fx = MockSession::new(MockSettings::default())?;
    let client = fx.client();
    let window = client_window(&client, 0, 0, 16, 16)?;
    let other = client_window(&client, 0, 0, 8, 8)?;

    let shape = other.surface()?;
    window.set_cursor_shape(Some(&shape), 0, 0)?;

    // Over-releasing the window's surface also drops the reference the window holds
    let own = window.surface()?;
    own.release()?;
    own.release()?;
    assert!(matches!(window.release(), Err(WmError::Destroyed)));

    // The cursor reference went away with the window
    shape.release()?;
    other.release()?;
    assert!(matches!(shape.release(), Err(WmError::Destroyed)));
    Ok(())
}
