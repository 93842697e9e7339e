pub(crate) mod body;
pub(crate) mod func;
pub(crate) mod opcode;

use std::collections::HashMap;

use anyhow::Context;
use body::{CodeEntry, TranslateEnv};
use func::{FuncIdx, FuncSig, TypeIdx};
use tracing::debug;
use wasmparser::{
    DataKind, DataSectionReader, ElementItems, ElementKind, ElementSectionReader, Export,
    ExportSectionReader, ExternalKind, FunctionBody, FunctionSectionReader, GlobalSectionReader,
    ImportSectionReader, MemorySectionReader, Operator, Parser, Payload, TableSectionReader,
    TypeRef, TypeSectionReader,
};

use crate::Engine;
use crate::interpreter::FunctionRegistry;
use crate::interpreter::call_site::Callable;
use crate::value::{Val, ValType};

/// A constant initializer for a global or a segment offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ConstExpr {
    Value(Val),
    GlobalGet(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Limits {
    pub(crate) initial: u32,
    pub(crate) maximum: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportName {
    pub(crate) module: String,
    pub(crate) name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct GlobalImport {
    pub(crate) name: ImportName,
    pub(crate) ty: ValType,
    pub(crate) mutable: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct GlobalDef {
    pub(crate) mutable: bool,
    pub(crate) init: ConstExpr,
}

/// An active element segment; `None` entries are `ref.null`.
#[derive(Debug, Clone)]
pub(crate) struct ElementSegment {
    pub(crate) offset: ConstExpr,
    pub(crate) funcs: Vec<Option<FuncIdx>>,
}

#[derive(Debug, Clone)]
pub(crate) struct DataSegment {
    pub(crate) offset: ConstExpr,
    pub(crate) bytes: Box<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExportKind {
    Func(FuncIdx),
    Global(u32),
    Memory,
    Table,
}

#[derive(Debug, Default)]
pub(crate) struct ParsedModule {
    pub(crate) types: Vec<FuncSig>,
    /// Type of every function, imports first.
    pub(crate) funcs: Vec<TypeIdx>,
    pub(crate) func_imports: Vec<ImportName>,
    pub(crate) global_imports: Vec<GlobalImport>,
    /// Bodies of defined functions, in function-index order.
    pub(crate) codes: Vec<CodeEntry>,
    pub(crate) globals: Vec<GlobalDef>,
    pub(crate) memory: Option<Limits>,
    pub(crate) table: Option<Limits>,
    pub(crate) elements: Vec<ElementSegment>,
    pub(crate) data: Vec<DataSegment>,
    pub(crate) exports: HashMap<String, ExportKind>,
    pub(crate) start: Option<FuncIdx>,
}

impl ParsedModule {
    pub(crate) fn num_func_imports(&self) -> u32 {
        self.func_imports.len() as u32
    }
}

impl FunctionRegistry for ParsedModule {
    fn resolve(&self, func: FuncIdx) -> Callable {
        let imports = self.num_func_imports();
        if func.0 < imports {
            Callable::Host(func.0)
        } else {
            Callable::Defined(func.0 - imports)
        }
    }

    fn signature(&self, func: FuncIdx) -> &FuncSig {
        self.function_type(self.funcs[func.0 as usize])
    }

    fn function_type(&self, ty: TypeIdx) -> &FuncSig {
        &self.types[ty.0 as usize]
    }

    fn code(&self, index: u32) -> &CodeEntry {
        &self.codes[index as usize]
    }
}

pub(crate) fn parse(engine: &Engine, bytes: &[u8]) -> Result<ParsedModule, anyhow::Error> {
    let mut validator = engine.new_validator();
    validator.validate_all(bytes)?;

    let mut builder = ModuleBuilder::new(bytes);
    let parser = Parser::new(0);
    for payload in parser.parse_all(bytes) {
        builder.process_payload(payload?)?;
    }

    let module = builder.module;
    debug!(
        types = module.types.len(),
        funcs = module.funcs.len(),
        imports = module.func_imports.len() + module.global_imports.len(),
        exports = module.exports.len(),
        "module parsed"
    );
    Ok(module)
}

struct ModuleBuilder<'a> {
    bytes: &'a [u8],
    module: ParsedModule,
}

impl<'a> ModuleBuilder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            module: ParsedModule::default(),
        }
    }

    fn process_payload(&mut self, payload: Payload) -> Result<(), anyhow::Error> {
        match payload {
            Payload::TypeSection(reader) => self.parse_type_section(reader),
            Payload::ImportSection(reader) => self.parse_import_section(reader),
            Payload::FunctionSection(reader) => self.parse_function_section(reader),
            Payload::TableSection(reader) => self.parse_table_section(reader),
            Payload::MemorySection(reader) => self.parse_memory_section(reader),
            Payload::GlobalSection(reader) => self.parse_global_section(reader),
            Payload::ExportSection(reader) => self.parse_export_section(reader),
            Payload::StartSection { func, .. } => {
                self.module.start = Some(FuncIdx(func));
                Ok(())
            }
            Payload::ElementSection(reader) => self.parse_element_section(reader),
            Payload::DataSection(reader) => self.parse_data_section(reader),
            Payload::CodeSectionEntry(body) => self.parse_body(body),
            _ => Ok(()),
        }
    }

    fn parse_type_section(&mut self, reader: TypeSectionReader) -> Result<(), anyhow::Error> {
        for ty in reader.into_iter_err_on_gc_types() {
            self.module.types.push(FuncSig::from_wasm(&ty?)?);
        }
        Ok(())
    }

    fn parse_import_section(&mut self, reader: ImportSectionReader) -> Result<(), anyhow::Error> {
        for import in reader {
            let import = import?;
            let name = ImportName {
                module: import.module.to_string(),
                name: import.name.to_string(),
            };
            match import.ty {
                TypeRef::Func(ty) => {
                    self.module.funcs.push(TypeIdx(ty));
                    self.module.func_imports.push(name);
                }
                TypeRef::Global(global) => {
                    self.module.global_imports.push(GlobalImport {
                        name,
                        ty: ValType::try_from(global.content_type)?,
                        mutable: global.mutable,
                    });
                }
                other => anyhow::bail!(
                    "import {}::{} of kind {other:?} is not supported",
                    name.module,
                    name.name
                ),
            }
        }
        Ok(())
    }

    fn parse_function_section(
        &mut self,
        reader: FunctionSectionReader,
    ) -> Result<(), anyhow::Error> {
        for ty in reader {
            self.module.funcs.push(TypeIdx(ty?));
        }
        Ok(())
    }

    fn parse_table_section(&mut self, reader: TableSectionReader) -> Result<(), anyhow::Error> {
        for table in reader {
            let table = table?;
            self.module.table = Some(Limits {
                initial: u32::try_from(table.ty.initial).context("table too large")?,
                maximum: table.ty.maximum.and_then(|max| u32::try_from(max).ok()),
            });
        }
        Ok(())
    }

    fn parse_memory_section(&mut self, reader: MemorySectionReader) -> Result<(), anyhow::Error> {
        for memory in reader {
            let memory = memory?;
            self.module.memory = Some(Limits {
                initial: u32::try_from(memory.initial).context("memory too large")?,
                maximum: memory.maximum.and_then(|max| u32::try_from(max).ok()),
            });
        }
        Ok(())
    }

    fn parse_global_section(&mut self, reader: GlobalSectionReader) -> Result<(), anyhow::Error> {
        for global in reader {
            let global = global?;
            self.module.globals.push(GlobalDef {
                mutable: global.ty.mutable,
                init: parse_const_expr(&global.init_expr)?,
            });
        }
        Ok(())
    }

    fn parse_export_section(&mut self, reader: ExportSectionReader) -> Result<(), anyhow::Error> {
        for export in reader {
            self.parse_export(export?)?;
        }
        Ok(())
    }

    fn parse_export(&mut self, export: Export) -> Result<(), anyhow::Error> {
        let kind = match export.kind {
            ExternalKind::Func => ExportKind::Func(FuncIdx(export.index)),
            ExternalKind::Global => ExportKind::Global(export.index),
            ExternalKind::Memory => ExportKind::Memory,
            ExternalKind::Table => ExportKind::Table,
            other => anyhow::bail!("export {} of kind {other:?} is not supported", export.name),
        };
        self.module.exports.insert(export.name.to_string(), kind);
        Ok(())
    }

    fn parse_element_section(
        &mut self,
        reader: ElementSectionReader,
    ) -> Result<(), anyhow::Error> {
        for element in reader {
            let element = element?;
            // Passive and declared segments only matter to bulk-table and
            // reference instructions, which are rejected at translation.
            let ElementKind::Active { offset_expr, .. } = element.kind else {
                continue;
            };
            let mut funcs = Vec::new();
            match element.items {
                ElementItems::Functions(indices) => {
                    for idx in indices {
                        funcs.push(Some(FuncIdx(idx?)));
                    }
                }
                ElementItems::Expressions(_, exprs) => {
                    for expr in exprs {
                        let mut ops = expr?.get_operators_reader();
                        funcs.push(match ops.read()? {
                            Operator::RefFunc { function_index } => Some(FuncIdx(function_index)),
                            Operator::RefNull { .. } => None,
                            other => anyhow::bail!("unsupported element expression {other:?}"),
                        });
                    }
                }
            }
            self.module.elements.push(ElementSegment {
                offset: parse_const_expr(&offset_expr)?,
                funcs,
            });
        }
        Ok(())
    }

    fn parse_data_section(&mut self, reader: DataSectionReader) -> Result<(), anyhow::Error> {
        for data in reader {
            let data = data?;
            if let DataKind::Active { offset_expr, .. } = data.kind {
                self.module.data.push(DataSegment {
                    offset: parse_const_expr(&offset_expr)?,
                    bytes: data.data.into(),
                });
            }
        }
        Ok(())
    }

    fn parse_body(&mut self, body: FunctionBody) -> Result<(), anyhow::Error> {
        let func = FuncIdx(self.module.num_func_imports() + self.module.codes.len() as u32);
        let env = TranslateEnv {
            types: &self.module.types,
            funcs: &self.module.funcs,
        };
        let code = CodeEntry::translate(func, &body, self.bytes, &env)?;
        self.module.codes.push(code);
        Ok(())
    }
}

fn parse_const_expr(expr: &wasmparser::ConstExpr) -> Result<ConstExpr, anyhow::Error> {
    let mut ops = expr.get_operators_reader();
    let value = match ops.read()? {
        Operator::I32Const { value } => ConstExpr::Value(Val::I32(value)),
        Operator::I64Const { value } => ConstExpr::Value(Val::I64(value)),
        Operator::F32Const { value } => ConstExpr::Value(Val::F32(f32::from_bits(value.bits()))),
        Operator::F64Const { value } => ConstExpr::Value(Val::F64(f64::from_bits(value.bits()))),
        Operator::GlobalGet { global_index } => ConstExpr::GlobalGet(global_index),
        other => anyhow::bail!("unsupported constant expression {other:?}"),
    };
    anyhow::ensure!(
        matches!(ops.read()?, Operator::End),
        "extended constant expressions are not supported"
    );
    Ok(value)
}
