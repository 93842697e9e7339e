use std::fmt;

use crate::value::ValType;

/// Index into the module's function list (imports first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncIdx(pub(crate) u32);

/// Index into the module's type section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeIdx(pub(crate) u32);

impl FuncIdx {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// A function signature with at most one result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncSig {
    pub params: Box<[ValType]>,
    pub result: Option<ValType>,
}

impl FuncSig {
    pub fn new(params: impl Into<Box<[ValType]>>, result: Option<ValType>) -> Self {
        Self {
            params: params.into(),
            result,
        }
    }

    pub(crate) fn from_wasm(ty: &wasmparser::FuncType) -> Result<Self, anyhow::Error> {
        let params = ty
            .params()
            .iter()
            .map(|&p| ValType::try_from(p))
            .collect::<Result<Box<[_]>, _>>()?;
        let result = match ty.results() {
            [] => None,
            [r] => Some(ValType::try_from(*r)?),
            more => anyhow::bail!("functions returning {} values are not supported", more.len()),
        };
        Ok(Self { params, result })
    }

    pub fn arity(&self) -> u32 {
        self.result.is_some() as u32
    }
}

impl fmt::Display for FuncSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")")?;
        if let Some(result) = self.result {
            write!(f, " -> {result}")?;
        }
        Ok(())
    }
}
