pub(crate) mod globals;
pub(crate) mod memory;
pub(crate) mod table;

use crate::Engine;

/// Per-embedding runtime state: user data and remaining fuel.
pub struct Store<T> {
    data: T,
    fuel: Option<u64>,
}

impl<T> Store<T> {
    pub fn new(engine: &Engine, data: T) -> Self {
        Self {
            data,
            fuel: engine.config().fuel,
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    /// Remaining fuel, or `None` when execution is unmetered.
    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    /// Replace the fuel budget. `None` disables metering.
    pub fn set_fuel(&mut self, fuel: Option<u64>) {
        self.fuel = fuel;
    }

    pub(crate) fn fuel_mut(&mut self) -> &mut Option<u64> {
        &mut self.fuel
    }
}
