use wasmparser::{Validator, WasmFeatures};

/// Default maximum call depth before trapping with `CallStackExhausted`.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 1_000;

/// Native stack reserved for each invocation. Every wasm call and nested
/// scope is a Rust frame, and unoptimized builds need close to 100 KiB per
/// call, so this covers the default call depth with room to spare. Pages
/// are only committed as they are touched.
pub const DEFAULT_NATIVE_STACK_SIZE: usize = 256 << 20;

/// Smallest native stack an invocation may be given.
pub const MIN_NATIVE_STACK_SIZE: usize = 4 << 20;

/// Largest memory a 32-bit address space can hold, in 64 KiB pages.
pub const DEFAULT_MAX_MEMORY_PAGES: u32 = 65_536;

/// Execution limits shared by every module and store built from an engine.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) max_call_depth: u32,
    pub(crate) fuel: Option<u64>,
    pub(crate) max_memory_pages: u32,
    pub(crate) native_stack_size: usize,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_call_depth(&mut self, depth: u32) -> &mut Self {
        self.max_call_depth = depth;
        self
    }

    /// Initial fuel for new stores; one unit is spent per instruction.
    pub fn fuel(&mut self, fuel: Option<u64>) -> &mut Self {
        self.fuel = fuel;
        self
    }

    pub fn max_memory_pages(&mut self, pages: u32) -> &mut Self {
        self.max_memory_pages = pages.min(DEFAULT_MAX_MEMORY_PAGES);
        self
    }

    /// Native stack size of the thread each invocation runs on. Deep
    /// recursion that would exceed it traps with `CallStackExhausted`.
    pub fn native_stack_size(&mut self, bytes: usize) -> &mut Self {
        self.native_stack_size = bytes.max(MIN_NATIVE_STACK_SIZE);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            fuel: None,
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            native_stack_size: DEFAULT_NATIVE_STACK_SIZE,
        }
    }
}

/// Shared compilation configuration.
#[derive(Debug, Clone)]
pub struct Engine {
    features: WasmFeatures,
    config: Config,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        let mut features = WasmFeatures::default();
        // Proposals whose instructions the interpreter cannot express.
        features.set(WasmFeatures::SIMD, false);
        features.set(WasmFeatures::RELAXED_SIMD, false);
        features.set(WasmFeatures::THREADS, false);
        features.set(WasmFeatures::EXCEPTIONS, false);
        features.set(WasmFeatures::TAIL_CALL, false);
        features.set(WasmFeatures::MEMORY64, false);
        features.set(WasmFeatures::MULTI_MEMORY, false);
        Self {
            features,
            config: config.clone(),
        }
    }

    /// Create a new validator with the engine's features.
    pub fn new_validator(&self) -> Validator {
        Validator::new_with_features(self.features)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}
