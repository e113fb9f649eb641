//! Graph IR produced by [`crate::builder::ComputationBuilder`].
//!
//! A [`Computation`] is a flat list of SSA instructions where every value id
//! equals the instruction's position and operands always refer to earlier
//! instructions. Parameters are numbered `0..n` without gaps and the root is
//! the value returned by the computation.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{XlaError, XlaResult};
use crate::literal::Literal;
use crate::shape::Shape;
use crate::shape_inference;

/// Serialisation format tag; an empty tag is read as the current one.
pub const FORMAT_VERSION: &str = "rexla.computation.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Tanh,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Tanh => "tanh",
        }
    }

    /// Exp, log and tanh are only defined for floating-point operands.
    pub fn requires_float(self) -> bool {
        matches!(self, UnaryOp::Exp | UnaryOp::Log | UnaryOp::Tanh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonDirection {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonDirection {
    pub fn name(self) -> &'static str {
        match self {
            ComparisonDirection::Eq => "eq",
            ComparisonDirection::Ne => "ne",
            ComparisonDirection::Lt => "lt",
            ComparisonDirection::Le => "le",
            ComparisonDirection::Gt => "gt",
            ComparisonDirection::Ge => "ge",
        }
    }

    pub fn is_ordering(self) -> bool {
        !matches!(self, ComparisonDirection::Eq | ComparisonDirection::Ne)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Parameter { number: usize, name: String },
    Constant(Literal),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(ComparisonDirection),
    Convert(DType),
    Select,
    Tuple,
    GetTupleElement { index: usize },
}

impl Operation {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Operation::Parameter { .. } => "parameter",
            Operation::Constant(_) => "constant",
            Operation::Unary(op) => op.name(),
            Operation::Binary(op) => op.name(),
            Operation::Compare(_) => "compare",
            Operation::Convert(_) => "convert",
            Operation::Select => "select",
            Operation::Tuple => "tuple",
            Operation::GetTupleElement { .. } => "get_tuple_element",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<ValueId>,
    pub shape: Shape,
}

/// Declared parameter shapes and the result shape of a computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramShape {
    pub parameters: Vec<Shape>,
    pub parameter_names: Vec<String>,
    pub result: Shape,
}

impl fmt::Display for ProgramShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .parameters
            .iter()
            .zip(&self.parameter_names)
            .map(|(shape, name)| format!("{name}: {shape}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "({params}) -> {}", self.result)
    }
}

fn default_format_version() -> String {
    FORMAT_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    #[serde(default = "default_format_version")]
    format_version: String,
    name: String,
    instructions: Vec<Instruction>,
    parameters: Vec<ValueId>,
    root: ValueId,
}

impl Computation {
    /// Assembles and validates a computation from SSA instructions.
    pub fn from_instructions(
        name: impl Into<String>,
        instructions: Vec<Instruction>,
        root: ValueId,
    ) -> XlaResult<Self> {
        let parameters = collect_parameters(&instructions)?;
        let computation = Self {
            format_version: FORMAT_VERSION.to_string(),
            name: name.into(),
            instructions,
            parameters,
            root,
        };
        computation.validate()?;
        Ok(computation)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction(&self, id: ValueId) -> Option<&Instruction> {
        self.instructions.get(id.index())
    }

    pub fn root(&self) -> ValueId {
        self.root
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Value ids of the parameters, indexed by parameter number.
    pub fn parameter_ids(&self) -> &[ValueId] {
        &self.parameters
    }

    pub fn parameter_shape(&self, number: usize) -> Option<&Shape> {
        let id = self.parameters.get(number)?;
        self.instruction(*id).map(|inst| &inst.shape)
    }

    pub fn result_shape(&self) -> &Shape {
        // `validate` guarantees the root exists.
        &self.instructions[self.root.index()].shape
    }

    pub fn program_shape(&self) -> ProgramShape {
        let mut parameters = Vec::with_capacity(self.parameters.len());
        let mut parameter_names = Vec::with_capacity(self.parameters.len());
        for id in &self.parameters {
            let inst = &self.instructions[id.index()];
            parameters.push(inst.shape.clone());
            parameter_names.push(match &inst.op {
                Operation::Parameter { name, .. } => name.clone(),
                _ => String::new(),
            });
        }
        ProgramShape {
            parameters,
            parameter_names,
            result: self.result_shape().clone(),
        }
    }

    /// Re-checks every structural invariant and re-runs shape inference.
    pub fn validate(&self) -> XlaResult<()> {
        if self.instructions.is_empty() {
            return Err(XlaError::build(format!(
                "computation '{}' has no instructions",
                self.name
            )));
        }
        for (index, inst) in self.instructions.iter().enumerate() {
            if inst.id.index() != index {
                return Err(XlaError::build(format!(
                    "instruction at position {index} has id {}",
                    inst.id
                )));
            }
            let mut operand_shapes = Vec::with_capacity(inst.operands.len());
            for operand in &inst.operands {
                if operand.index() >= index {
                    return Err(XlaError::build(format!(
                        "{} uses {operand}, which is not defined before it",
                        inst.id
                    )));
                }
                operand_shapes.push(&self.instructions[operand.index()].shape);
            }
            if let Operation::Constant(literal) = &inst.op {
                literal.validate()?;
            }
            match &inst.op {
                Operation::Parameter { .. } => {
                    if !inst.operands.is_empty() {
                        return Err(XlaError::build(format!(
                            "parameter {} must not have operands",
                            inst.id
                        )));
                    }
                    inst.shape.validate_layouts()?;
                }
                op => {
                    let inferred = shape_inference::infer(op, &operand_shapes)?;
                    if inferred != inst.shape {
                        return Err(XlaError::build(format!(
                            "{} declares shape {} but {} infers {inferred}",
                            inst.id,
                            inst.shape,
                            op.mnemonic()
                        )));
                    }
                }
            }
        }
        if self.root.index() >= self.instructions.len() {
            return Err(XlaError::build(format!(
                "root {} is out of range",
                self.root
            )));
        }
        let parameters = collect_parameters(&self.instructions)?;
        if parameters != self.parameters {
            return Err(XlaError::build("parameter table does not match instructions"));
        }
        Ok(())
    }

    pub fn to_json_string(&self) -> XlaResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(src: &str) -> XlaResult<Self> {
        let computation: Computation = serde_json::from_str(src)?;
        computation.normalized()
    }

    pub fn to_bincode_bytes(&self) -> XlaResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> XlaResult<Self> {
        let computation: Computation = bincode::deserialize(bytes)?;
        computation.normalized()
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> XlaResult<()> {
        let contents = self.to_json_string()?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> XlaResult<Self> {
        let contents = fs::read_to_string(path)?;
        Computation::from_json_str(&contents)
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> XlaResult<()> {
        let bytes = self.to_bincode_bytes()?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> XlaResult<Self> {
        let bytes = fs::read(path)?;
        Computation::from_bincode_slice(&bytes)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }

    fn normalized(mut self) -> XlaResult<Self> {
        if self.format_version.is_empty() {
            self.format_version = FORMAT_VERSION.to_string();
        }
        if self.format_version != FORMAT_VERSION {
            return Err(XlaError::build(format!(
                "computation format '{}' does not match expected '{FORMAT_VERSION}'",
                self.format_version
            )));
        }
        self.validate()?;
        Ok(self)
    }
}

/// Maps parameter numbers to value ids, rejecting duplicates and gaps.
pub(crate) fn collect_parameters(instructions: &[Instruction]) -> XlaResult<Vec<ValueId>> {
    let mut slots: Vec<Option<ValueId>> = Vec::new();
    for inst in instructions {
        if let Operation::Parameter { number, .. } = inst.op {
            if number >= instructions.len() {
                return Err(XlaError::build(format!(
                    "parameter number {number} of {} is out of range for {} instructions",
                    inst.id,
                    instructions.len()
                )));
            }
            if number >= slots.len() {
                slots.resize(number + 1, None);
            }
            if let Some(existing) = slots[number] {
                return Err(XlaError::build(format!(
                    "parameter number {number} is declared twice ({existing} and {})",
                    inst.id
                )));
            }
            slots[number] = Some(inst.id);
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(number, slot)| {
            slot.ok_or_else(|| {
                XlaError::build(format!("parameter number {number} is missing"))
            })
        })
        .collect()
}

impl fmt::Display for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(f, 0, &format!("computation @{} {{", self.name))?;
        if !self.parameters.is_empty() {
            write_line(f, 1, "params:")?;
            for (number, id) in self.parameters.iter().enumerate() {
                let inst = &self.instructions[id.index()];
                let name = match &inst.op {
                    Operation::Parameter { name, .. } => name.as_str(),
                    _ => "",
                };
                write_line(f, 2, &format!("{id} : {} (#{number} {name:?})", inst.shape))?;
            }
        }
        write_line(f, 1, "body:")?;
        for inst in &self.instructions {
            if matches!(inst.op, Operation::Parameter { .. }) {
                continue;
            }
            write_line(f, 2, &format_instruction(inst))?;
        }
        write_line(f, 1, &format!("root: {}", self.root))?;
        write_line(f, 0, "}")
    }
}

fn format_instruction(inst: &Instruction) -> String {
    let operands = inst
        .operands
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let attrs = match &inst.op {
        Operation::Constant(literal) => format!(" {literal}"),
        Operation::Compare(direction) => format!(" direction={}", direction.name()),
        Operation::Convert(dtype) => format!(" to={dtype}"),
        Operation::GetTupleElement { index } => format!(" index={index}"),
        _ => String::new(),
    };
    format!(
        "{} = {}({operands}){attrs} : {}",
        inst.id,
        inst.op.mnemonic(),
        inst.shape
    )
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    writeln!(f, "{:width$}{line}", "", width = indent * 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::ArrayData;

    fn param(id: u32, number: usize, shape: Shape) -> Instruction {
        Instruction {
            id: ValueId(id),
            op: Operation::Parameter {
                number,
                name: format!("p{number}"),
            },
            operands: Vec::new(),
            shape,
        }
    }

    fn add_graph() -> Computation {
        let vec2 = Shape::array(DType::F32, [2]);
        Computation::from_instructions(
            "add",
            vec![
                param(0, 0, vec2.clone()),
                param(1, 1, vec2.clone()),
                Instruction {
                    id: ValueId(2),
                    op: Operation::Binary(BinaryOp::Add),
                    operands: vec![ValueId(0), ValueId(1)],
                    shape: vec2,
                },
            ],
            ValueId(2),
        )
        .unwrap()
    }

    #[test]
    fn program_shape_lists_parameters_in_order() {
        let computation = add_graph();
        let shape = computation.program_shape();
        assert_eq!(shape.parameters.len(), 2);
        assert_eq!(shape.to_string(), "(p0: f32[2], p1: f32[2]) -> f32[2]");
    }

    #[test]
    fn parameter_gaps_and_duplicates_are_rejected() {
        let scalar = Shape::scalar(DType::F32);
        let gap = vec![param(0, 0, scalar.clone()), param(1, 2, scalar.clone())];
        let err = Computation::from_instructions("gap", gap, ValueId(1)).unwrap_err();
        assert!(err.to_string().contains("parameter number 1 is missing"));

        let dup = vec![param(0, 0, scalar.clone()), param(1, 0, scalar)];
        let err = Computation::from_instructions("dup", dup, ValueId(1)).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn forward_references_are_rejected() {
        let scalar = Shape::scalar(DType::F32);
        let instructions = vec![Instruction {
            id: ValueId(0),
            op: Operation::Unary(UnaryOp::Neg),
            operands: vec![ValueId(0)],
            shape: scalar,
        }];
        assert!(Computation::from_instructions("bad", instructions, ValueId(0)).is_err());
    }

    #[test]
    fn json_and_bincode_round_trip() {
        let computation = add_graph();
        let json = computation.to_json_string().unwrap();
        assert_eq!(Computation::from_json_str(&json).unwrap(), computation);
        let bytes = computation.to_bincode_bytes().unwrap();
        assert_eq!(Computation::from_bincode_slice(&bytes).unwrap(), computation);
    }

    #[test]
    fn mismatched_declared_shape_fails_validation() {
        let mut computation = add_graph();
        computation.instructions[2].shape = Shape::array(DType::F32, [3]);
        let json = serde_json::to_string(&computation).unwrap();
        assert!(Computation::from_json_str(&json).is_err());
    }

    #[test]
    fn out_of_range_parameter_number_is_rejected() {
        for number in [usize::MAX, 1 << 40] {
            let mut computation = add_graph();
            computation.instructions[1].op = Operation::Parameter {
                number,
                name: "p1".into(),
            };
            let json = serde_json::to_string(&computation).unwrap();
            let err = Computation::from_json_str(&json).unwrap_err();
            assert!(matches!(err, XlaError::Build(_)), "{err}");
            assert!(err.to_string().contains("out of range"), "{err}");
        }
    }

    #[test]
    fn constant_with_short_data_fails_validation() {
        let vec3 = Shape::array(DType::F32, [3]);
        let mut computation = Computation::from_instructions(
            "add_constant",
            vec![
                param(0, 0, vec3.clone()),
                Instruction {
                    id: ValueId(1),
                    op: Operation::Constant(Literal::r1(&[2.0f32, 3.0, 4.0])),
                    operands: Vec::new(),
                    shape: vec3.clone(),
                },
                Instruction {
                    id: ValueId(2),
                    op: Operation::Binary(BinaryOp::Add),
                    operands: vec![ValueId(0), ValueId(1)],
                    shape: vec3,
                },
            ],
            ValueId(2),
        )
        .unwrap();
        if let Operation::Constant(Literal::Array { data, .. }) = &mut computation.instructions[1].op {
            *data = ArrayData::F32(vec![2.0, 3.0]);
        }
        let json = serde_json::to_string(&computation).unwrap();
        let err = Computation::from_json_str(&json).unwrap_err();
        assert!(matches!(err, XlaError::InvalidLiteral(_)), "{err}");
        assert!(err.to_string().contains("2 elements supplied"), "{err}");
    }

    #[test]
    fn text_form_lists_body() {
        let text = add_graph().to_text();
        assert!(text.starts_with("computation @add {"));
        assert!(text.contains("%2 = add(%0, %1) : f32[2]"));
        assert!(text.contains("root: %2"));
    }
}
