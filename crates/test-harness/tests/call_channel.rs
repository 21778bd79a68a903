//! Call channel tests through full sessions

use fusion::{CallContext, ExecFlags, HandlerResult, TransportKind};
use test_harness::fixtures::{mock_config, session_index, system_pools, TEST_SYSTEM_POOL};
use test_harness::{MockBackend, MockSettings};
use wm::{Config, Session};

fn tripler(ctx: &CallContext) -> HandlerResult {
    HandlerResult::Return(ctx.arg * 3)
}

fn session(config: Config) -> anyhow::Result<(Session, std::sync::Arc<MockBackend>)> {
    let backend = MockBackend::new(MockSettings::default());
    let session = Session::create(session_index(), config, system_pools(TEST_SYSTEM_POOL)?, backend.registry())?;
    Ok((session, backend))
}

// ========== Local execution tests ==========

#[test]
fn local_call_stays_off_the_transport() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = Config {
        transport: TransportKind::Socket,
        socket_dir: Some(tmp.path().to_path_buf()),
        ..mock_config()
    };
    let (session, _backend) = session(config)?;
    let call = session.register_call(tripler)?;

    let value = call.execute(session.world(), ExecFlags::empty(), 14, 0)?;
    assert_eq!(value, 42);
    assert_eq!(session.world().messages_sent(), 0);
    Ok(())
}

#[test]
fn single_process_calls_are_direct_even_without_direct_flag() -> anyhow::Result<()> {
    let (session, _backend) = session(mock_config())?;
    let call = session.register_call(tripler)?;

    assert_eq!(call.execute(session.world(), ExecFlags::NO_DIRECT, 5, 0)?, 15);
    assert_eq!(session.world().messages_sent(), 0);
    Ok(())
}

// ========== Remote execution tests ==========

fn remote_call(transport: TransportKind) -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = Config {
        transport,
        socket_dir: Some(tmp.path().to_path_buf()),
        ..mock_config()
    };
    let (master, _backend) = session(config.clone())?;
    let other = MockBackend::new(MockSettings::default());
    let slave = Session::join(master.shared(), config, other.registry())?;

    let call = master.register_call(tripler)?;
    assert_eq!(call.execute(slave.world(), ExecFlags::empty(), 7, 0)?, 21);
    assert_eq!(slave.world().messages_sent(), 1);

    assert_eq!(call.execute(master.world(), ExecFlags::NO_DIRECT, 2, 0)?, 6);
    assert_eq!(master.world().messages_sent(), 1);

    slave.leave(false)?;
    Ok(())
}

#[test]
fn remote_call_over_kernel_transport() -> anyhow::Result<()> {
    remote_call(TransportKind::Kernel)
}

#[test]
fn remote_call_over_socket_transport() -> anyhow::Result<()> {
    remote_call(TransportKind::Socket)
}
