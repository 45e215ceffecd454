/// Galaxy RHI - startup/shutdown orchestrator and logging entry points
///
/// [`Rhi`] resolves the configured backend, creates the device, the command
/// queue and the render thread pool, and provides them in its
/// [`ServiceRegistry`]. The active logger is process-wide and shared by every
/// `Rhi` instance.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::SystemTime;

use crate::backend::{BackendRegistry, RhiType};
use crate::command::CommandQueue;
use crate::config::RhiConfig;
use crate::device::{Device, SharedDevice};
use crate::error::{Error, Result};
use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
use crate::service_registry::ServiceRegistry;
use crate::task::RenderThreadPool;

const SOURCE: &str = "galaxy_rhi::Rhi";

// ===== LOGGING STATE =====

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

/// Entries below this severity are discarded
static MIN_SEVERITY: AtomicU8 = AtomicU8::new(LogSeverity::Trace as u8);

fn logger() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)))
}

// ===== PUBLIC API =====

/// Running RHI instance
///
/// # Example
///
/// ```no_run
/// use galaxy_rhi::rhi::{BackendRegistry, Rhi, RhiConfig};
///
/// let mut rhi = Rhi::initialize(RhiConfig::default(), &BackendRegistry::with_defaults())?;
///
/// let queue = rhi.command_queue()?;
/// let list = queue.create_command_list("frame");
/// // ... record, submit, execute_all()
///
/// rhi.shutdown();
/// # Ok::<(), galaxy_rhi::rhi::Error>(())
/// ```
pub struct Rhi {
    config: RhiConfig,
    backend: Option<RhiType>,
    services: ServiceRegistry,
}

impl Rhi {
    /// Create the device, command queue and thread pool for `config`
    ///
    /// # Arguments
    ///
    /// * `config` - Startup configuration
    /// * `backends` - Registered backends; `config.rhi_type` is resolved here
    ///
    /// # Errors
    ///
    /// `UnsupportedBackend` when the backend cannot be resolved,
    /// `InitializationFailed` when the device or the workers cannot start.
    pub fn initialize(config: RhiConfig, backends: &BackendRegistry) -> Result<Self> {
        let device = backends.create_device(&config).map_err(|e| {
            crate::rhi_error!(SOURCE, "Device creation failed: {}", e);
            e
        })?;
        let backend = device.lock().unwrap_or_else(|e| e.into_inner()).backend();

        let queue = Arc::new(CommandQueue::new(Arc::clone(&device)));
        queue.set_thread_count(config.queue_thread_count);

        let pool = Arc::new(RenderThreadPool::new(config.worker_threads));
        pool.start()?;

        let mut services = ServiceRegistry::new();
        services.provide::<Mutex<dyn Device>>(device);
        services.provide(queue);
        services.provide(pool);

        crate::rhi_info!(SOURCE, "RHI initialized with the '{}' backend", backend);
        Ok(Self { config, backend: Some(backend), services })
    }

    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    /// Backend in use (`None` after shutdown)
    pub fn backend(&self) -> Option<RhiType> {
        self.backend
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    fn service<T: ?Sized + Send + Sync + 'static>(&self, what: &str) -> Result<Arc<T>> {
        self.services
            .get::<T>()
            .ok_or_else(|| Error::InvalidState(format!("{} is not available (RHI shut down)", what)))
    }

    pub fn device(&self) -> Result<SharedDevice> {
        self.service::<Mutex<dyn Device>>("device")
    }

    pub fn command_queue(&self) -> Result<Arc<CommandQueue>> {
        self.service::<CommandQueue>("command queue")
    }

    pub fn thread_pool(&self) -> Result<Arc<RenderThreadPool>> {
        self.service::<RenderThreadPool>("thread pool")
    }

    /// Services provided by this instance
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Register additional services next to the built-in ones
    pub fn services_mut(&mut self) -> &mut ServiceRegistry {
        &mut self.services
    }

    /// Stop the workers, drain the queue and release the device
    ///
    /// Subsystems go down in reverse creation order. Calling it twice is a no-op.
    pub fn shutdown(&mut self) {
        if self.backend.take().is_none() {
            return;
        }

        if let Some(pool) = self.services.remove::<RenderThreadPool>() {
            pool.wait_for_completion();
            pool.stop();
        }
        if let Some(queue) = self.services.remove::<CommandQueue>() {
            queue.wait();
        }
        if let Some(device) = self.services.remove::<Mutex<dyn Device>>() {
            let mut device = device.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = device.wait_idle() {
                crate::rhi_warn!(SOURCE, "wait_idle() during shutdown failed: {}", e);
            }
        }
        self.services.clear();
        crate::rhi_info!(SOURCE, "RHI shut down");
    }

    // ===== LOGGING API =====

    /// Set a custom logger
    ///
    /// Replace the default logger with a custom implementation (file logger, capture for tests, etc.)
    ///
    /// # Arguments
    ///
    /// * `logger` - Any type implementing the Logger trait
    pub fn set_logger<L: Logger + 'static>(logger: L) {
        if let Ok(mut lock) = self::logger().write() {
            *lock = Box::new(logger);
        }
    }

    /// Reset logger to default (DefaultLogger)
    pub fn reset_logger() {
        if let Ok(mut lock) = logger().write() {
            *lock = Box::new(DefaultLogger);
        }
    }

    /// Discard entries below `severity`
    pub fn set_min_severity(severity: LogSeverity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    pub fn min_severity() -> LogSeverity {
        match MIN_SEVERITY.load(Ordering::Relaxed) {
            0 => LogSeverity::Trace,
            1 => LogSeverity::Debug,
            2 => LogSeverity::Info,
            3 => LogSeverity::Warn,
            _ => LogSeverity::Error,
        }
    }

    /// Internal logging method (for simple logs without file:line)
    ///
    /// Used by macros like rhi_info!, rhi_warn!, etc.
    ///
    /// # Arguments
    ///
    /// * `severity` - Log severity level
    /// * `source` - Source module (e.g., "galaxy_rhi::CommandQueue")
    /// * `message` - Log message
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        Self::dispatch(LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: None,
            line: None,
        });
    }

    /// Internal logging method with file:line information (for ERROR logs)
    ///
    /// # Arguments
    ///
    /// * `severity` - Log severity level (typically Error)
    /// * `source` - Source module (e.g., "galaxy_rhi::legacy")
    /// * `message` - Log message
    /// * `file` - Source file path
    /// * `line` - Source line number
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        Self::dispatch(LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: Some(file),
            line: Some(line),
        });
    }

    fn dispatch(entry: LogEntry) {
        if (entry.severity as u8) < MIN_SEVERITY.load(Ordering::Relaxed) {
            return;
        }
        if let Ok(lock) = logger().read() {
            lock.log(&entry);
        }
    }
}

impl Drop for Rhi {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
