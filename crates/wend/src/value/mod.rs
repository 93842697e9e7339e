use std::fmt;

/// Value types understood by the interpreter.
///
/// Every value occupies one 64-bit operand slot; `F32` and `I32` live in the
/// low 32 bits of their slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
}

impl TryFrom<wasmparser::ValType> for ValType {
    type Error = anyhow::Error;

    fn try_from(ty: wasmparser::ValType) -> Result<Self, Self::Error> {
        match ty {
            wasmparser::ValType::I32 => Ok(ValType::I32),
            wasmparser::ValType::I64 => Ok(ValType::I64),
            wasmparser::ValType::F32 => Ok(ValType::F32),
            wasmparser::ValType::F64 => Ok(ValType::F64),
            other => anyhow::bail!("unsupported value type {other:?}"),
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Dynamic WASM value for untyped function calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

/// Convert a single Rust value to/from a `Val`.
pub trait WasmVal: Sized {
    fn to_val(&self) -> Val;
    fn from_val(val: &Val) -> Result<Self, anyhow::Error>;
}

impl WasmVal for i32 {
    fn to_val(&self) -> Val {
        Val::I32(*self)
    }
    fn from_val(val: &Val) -> Result<Self, anyhow::Error> {
        match val {
            Val::I32(v) => Ok(*v),
            _ => anyhow::bail!("expected i32, got {val:?}"),
        }
    }
}

impl WasmVal for i64 {
    fn to_val(&self) -> Val {
        Val::I64(*self)
    }
    fn from_val(val: &Val) -> Result<Self, anyhow::Error> {
        match val {
            Val::I64(v) => Ok(*v),
            _ => anyhow::bail!("expected i64, got {val:?}"),
        }
    }
}

impl WasmVal for f32 {
    fn to_val(&self) -> Val {
        Val::F32(*self)
    }
    fn from_val(val: &Val) -> Result<Self, anyhow::Error> {
        match val {
            Val::F32(v) => Ok(*v),
            _ => anyhow::bail!("expected f32, got {val:?}"),
        }
    }
}

impl WasmVal for f64 {
    fn to_val(&self) -> Val {
        Val::F64(*self)
    }
    fn from_val(val: &Val) -> Result<Self, anyhow::Error> {
        match val {
            Val::F64(v) => Ok(*v),
            _ => anyhow::bail!("expected f64, got {val:?}"),
        }
    }
}

/// Convert Rust types into WASM call arguments.
pub trait WasmArgs {
    fn to_vals(&self) -> Vec<Val>;
}

/// Convert WASM results back into Rust types.
pub trait WasmResults: Sized {
    fn from_vals(vals: &[Val]) -> Result<Self, anyhow::Error>;
}

impl WasmArgs for () {
    fn to_vals(&self) -> Vec<Val> {
        vec![]
    }
}

impl WasmResults for () {
    fn from_vals(vals: &[Val]) -> Result<Self, anyhow::Error> {
        anyhow::ensure!(vals.is_empty(), "expected no results, got {}", vals.len());
        Ok(())
    }
}

macro_rules! impl_wasm_tuples {
    ($(($($T:ident),+)),* $(,)?) => {
        $(
            impl<$($T: WasmVal),+> WasmArgs for ($($T,)+) {
                #[allow(non_snake_case)]
                fn to_vals(&self) -> Vec<Val> {
                    let ($($T,)+) = self;
                    vec![$($T.to_val()),+]
                }
            }

            impl<$($T: WasmVal),+> WasmResults for ($($T,)+) {
                #[allow(non_snake_case)]
                fn from_vals(vals: &[Val]) -> Result<Self, anyhow::Error> {
                    impl_wasm_tuples!(@destructure vals, $($T),+)
                }
            }
        )*
    };

    (@destructure $vals:ident, $($T:ident),+) => {{
        let expected = impl_wasm_tuples!(@count $($T),+);
        anyhow::ensure!(
            $vals.len() == expected,
            "expected {} results, got {}",
            expected,
            $vals.len()
        );
        let mut _i = 0;
        Ok(($({
            let v = $T::from_val(&$vals[_i])?;
            _i += 1;
            v
        },)+))
    }};

    (@count $($T:ident),+) => {
        <[()]>::len(&[$(impl_wasm_tuples!(@unit $T)),+])
    };

    (@unit $T:ident) => { () };
}

impl_wasm_tuples!(
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
    (A, B, C, D, E),
    (A, B, C, D, E, F),
    (A, B, C, D, E, F, G),
    (A, B, C, D, E, F, G, H),
    (A, B, C, D, E, F, G, H, I),
    (A, B, C, D, E, F, G, H, I, J),
    (A, B, C, D, E, F, G, H, I, J, K),
    (A, B, C, D, E, F, G, H, I, J, K, L),
    (A, B, C, D, E, F, G, H, I, J, K, L, M),
    (A, B, C, D, E, F, G, H, I, J, K, L, M, N),
    (A, B, C, D, E, F, G, H, I, J, K, L, M, N, O),
    (A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P),
);

impl Val {
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(..) => ValType::I32,
            Val::I64(..) => ValType::I64,
            Val::F32(..) => ValType::F32,
            Val::F64(..) => ValType::F64,
        }
    }

    /// Raw slot encoding of this value.
    pub(crate) fn to_bits(self) -> u64 {
        match self {
            Val::I32(v) => v as u32 as u64,
            Val::I64(v) => v as u64,
            Val::F32(v) => v.to_bits() as u64,
            Val::F64(v) => v.to_bits(),
        }
    }

    /// Reinterpret a raw slot as a value of type `ty`.
    pub(crate) fn from_bits(bits: u64, ty: ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(bits as u32 as i32),
            ValType::I64 => Val::I64(bits as i64),
            ValType::F32 => Val::F32(f32::from_bits(bits as u32)),
            ValType::F64 => Val::F64(f64::from_bits(bits)),
        }
    }

    /// Parse a textual argument as a value of type `ty`.
    pub fn parse(text: &str, ty: ValType) -> Result<Val, anyhow::Error> {
        let val = match ty {
            ValType::I32 => Val::I32(match text.parse::<i32>() {
                Ok(v) => v,
                Err(_) => text.parse::<u32>()? as i32,
            }),
            ValType::I64 => Val::I64(match text.parse::<i64>() {
                Ok(v) => v,
                Err(_) => text.parse::<u64>()? as i64,
            }),
            ValType::F32 => Val::F32(text.parse()?),
            ValType::F64 => Val::F64(text.parse()?),
        };
        Ok(val)
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::I32(v) => write!(f, "{v}"),
            Val::I64(v) => write!(f, "{v}"),
            Val::F32(v) => write!(f, "{v}"),
            Val::F64(v) => write!(f, "{v}"),
        }
    }
}
