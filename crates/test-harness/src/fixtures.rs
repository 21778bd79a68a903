//! Test fixtures for common session setups

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use surface::{FbdevPool, PoolRegistry, SurfaceError, SystemPool, VideoMode};
use thiserror::Error;
use wm::types::WindowDescription;
use wm::{ClientSession, Config, IWindow, LayerContext, Session, WindowStack, WmError};

use crate::framebuffer::RecordingFramebuffer;
use crate::mock::{MockBackend, MockSettings, MOCK_MODULE};

/// Standard test layer dimensions
pub const TEST_WIDTH: i32 = 640;
pub const TEST_HEIGHT: i32 = 480;

/// System memory pool size of the fixtures
pub const TEST_SYSTEM_POOL: usize = 4 << 20;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Wm(#[from] WmError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("layer context has no stack")]
    NoStack,
}

static NEXT_INDEX: AtomicU32 = AtomicU32::new(100);

/// A fresh session index, so parallel tests never share a name
pub fn session_index() -> u32 {
    NEXT_INDEX.fetch_add(1, Ordering::Relaxed)
}

/// Config selecting the mock backend
pub fn mock_config() -> Config {
    Config {
        wm: Some(MOCK_MODULE.into()),
        ..Config::default()
    }
}

/// A registry with one system memory pool
pub fn system_pools(size: usize) -> Result<Arc<PoolRegistry>, HarnessError> {
    let registry = Arc::new(PoolRegistry::new());
    registry.register(Arc::new(SystemPool::init(size)?));
    Ok(registry)
}

/// A registry with a recording framebuffer pool in front of system memory
pub fn framebuffer_pools(
    fb_size: usize,
    modes: Vec<VideoMode>,
) -> Result<(Arc<PoolRegistry>, Arc<RecordingFramebuffer>, Arc<FbdevPool>), HarnessError> {
    let fb = Arc::new(RecordingFramebuffer::new(fb_size, modes)?);
    let fbdev = Arc::new(FbdevPool::init(fb.clone())?);
    let registry = system_pools(TEST_SYSTEM_POOL)?;
    registry.register(fbdev.clone());
    Ok((registry, fb, fbdev))
}

/// A session running the mock backend, with one layer context
pub struct MockSession {
    pub session: Session,
    pub backend: Arc<MockBackend>,
    pub context: Arc<LayerContext>,
}

impl MockSession {
    pub fn new(settings: MockSettings) -> Result<Self, HarnessError> {
        Self::with_pools(settings, system_pools(TEST_SYSTEM_POOL)?)
    }

    pub fn with_pools(settings: MockSettings, pools: Arc<PoolRegistry>) -> Result<Self, HarnessError> {
        let backend = MockBackend::new(settings);
        let session = Session::create(session_index(), mock_config(), pools, backend.registry())?;
        let context = session.create_context(TEST_WIDTH, TEST_HEIGHT)?;
        Ok(Self {
            session,
            backend,
            context,
        })
    }

    pub fn stack(&self) -> Result<Arc<WindowStack>, HarnessError> {
        self.context.stack().ok_or(HarnessError::NoStack)
    }

    pub fn client(&self) -> ClientSession {
        ClientSession::new(&self.session, self.context.clone())
    }

    pub fn shutdown(self) -> Result<(), HarnessError> {
        drop(self.context);
        Ok(self.session.shutdown(false)?)
    }
}

/// A plain client window
pub fn client_window(client: &ClientSession, x: i32, y: i32, width: i32, height: i32) -> Result<Arc<IWindow>, HarnessError> {
    Ok(client.create_window(&WindowDescription::new(x, y, width, height))?)
}
