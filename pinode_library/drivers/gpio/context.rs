//! Process-scoped GPIO state
//!
//! One context is built per gateway and handed to every GPIO device at
//! construction. It carries the numbering mode and the shared driver. The
//! driver is shut down exactly once, when the last clone is dropped.

use parking_lot::Mutex;
use pinode_core::driver::BoardMode;
use pinode_core::error::{PinodeError, PinodeResult};
use std::sync::Arc;

use super::{GpioDriver, GpioDriverBackend, SimulatedChip};

/// Physical header pin → BCM line, 40-pin header
pub const BOARD_TO_BCM: [(u8, u8); 28] = [
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

const MAX_BCM_LINE: u8 = 27;

struct ContextInner {
    board_mode: BoardMode,
    driver: Mutex<GpioDriver>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        log::debug!("GPIO cleanup");
        if let Err(e) = self.driver.get_mut().shutdown() {
            log::warn!("GPIO cleanup failed: {}", e);
        }
    }
}

#[derive(Clone)]
pub struct GpioContext {
    inner: Arc<ContextInner>,
}

impl GpioContext {
    /// Initialize the backend. Fails with `ResourceUnavailable` when the
    /// GPIO hardware cannot be opened.
    pub fn new(backend: GpioDriverBackend, board_mode: BoardMode) -> PinodeResult<Self> {
        let mut driver = GpioDriver::new(backend);
        driver.init()?;
        log::info!("GPIO ready ({:?} backend, {} numbering)", backend, board_mode);
        Ok(Self {
            inner: Arc::new(ContextInner {
                board_mode,
                driver: Mutex::new(driver),
            }),
        })
    }

    pub fn simulation(board_mode: BoardMode) -> Self {
        let mut driver = GpioDriver::simulation();
        // Simulation init cannot fail
        let _ = driver.init();
        Self {
            inner: Arc::new(ContextInner {
                board_mode,
                driver: Mutex::new(driver),
            }),
        }
    }

    pub fn board_mode(&self) -> BoardMode {
        self.inner.board_mode
    }

    /// Translate a configured pin number to a BCM line
    pub fn resolve(&self, pin: u8) -> PinodeResult<u8> {
        match self.inner.board_mode {
            BoardMode::Bcm if pin <= MAX_BCM_LINE => Ok(pin),
            BoardMode::Bcm => Err(PinodeError::config(format!(
                "BCM line {} does not exist (0..={})",
                pin, MAX_BCM_LINE
            ))),
            BoardMode::Board => BOARD_TO_BCM
                .iter()
                .find(|(physical, _)| *physical == pin)
                .map(|(_, line)| *line)
                .ok_or_else(|| {
                    PinodeError::config(format!("Header pin {} is not a GPIO pin", pin))
                }),
        }
    }

    /// Run `f` with exclusive access to the driver
    pub fn with_driver<R>(
        &self,
        f: impl FnOnce(&mut GpioDriver) -> PinodeResult<R>,
    ) -> PinodeResult<R> {
        let mut driver = self.inner.driver.lock();
        f(&mut driver)
    }

    /// The simulated chip, when running on the simulation backend
    pub fn simulated_chip(&self) -> Option<SimulatedChip> {
        match &*self.inner.driver.lock() {
            GpioDriver::Simulation(sim) => Some(sim.chip()),
            #[cfg(feature = "gpio-hardware")]
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.driver.lock().is_available()
    }
}

impl std::fmt::Debug for GpioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioContext")
            .field("board_mode", &self.inner.board_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_numbering() {
        let ctx = GpioContext::simulation(BoardMode::Board);
        assert_eq!(ctx.resolve(11).unwrap(), 17);
        assert_eq!(ctx.resolve(12).unwrap(), 18);
        assert_eq!(ctx.resolve(40).unwrap(), 21);
        // 3.3V and ground pins
        assert!(matches!(ctx.resolve(1), Err(PinodeError::Config(_))));
        assert!(ctx.resolve(6).is_err());
        assert!(ctx.resolve(41).is_err());
    }

    #[test]
    fn test_bcm_numbering() {
        let ctx = GpioContext::simulation(BoardMode::Bcm);
        assert_eq!(ctx.resolve(17).unwrap(), 17);
        assert!(ctx.resolve(28).is_err());
    }

    #[test]
    fn test_cleanup_runs_once_after_last_clone() {
        let ctx = GpioContext::simulation(BoardMode::Bcm);
        let chip = ctx.simulated_chip().unwrap();
        let clone = ctx.clone();

        drop(ctx);
        assert_eq!(chip.cleanup_count(), 0);
        drop(clone);
        assert_eq!(chip.cleanup_count(), 1);
    }
}
