use std::collections::HashMap;
use std::fmt;

use crate::dtype::DataType;
use crate::engine::{EngineKind, RuntimeKind};
use crate::error::{EngineError, Result};
use crate::tensor_desc::TensorDesc;

/// The computation an operator descriptor asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// Dense matrix product: `dst[M,N] = src[M,K] @ weight[K,N]`.
    Matmul,
    /// Row-wise softmax over the last dimension.
    Softmax,
    /// Element-wise unary function named by the `algorithm` attribute.
    Eltwise,
}

/// Execution mode of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KernelProp {
    #[default]
    ForwardInference,
    ForwardTraining,
}

/// Role of one tensor descriptor in an operator, fixed by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
    Src,
    Weight,
    Dst,
}

impl TensorRole {
    pub fn is_input(&self) -> bool {
        !matches!(self, TensorRole::Dst)
    }
}

impl KernelKind {
    /// Ordered tensor roles for this kind.
    ///
    /// This is the contract between an operator descriptor and an execution
    /// context: the context's inputs are the input roles in this order and its
    /// outputs are the output roles in this order. Shape scalars are never
    /// passed as context slots; kernels read them from the descriptor.
    pub fn roles(&self) -> &'static [TensorRole] {
        match self {
            KernelKind::Matmul => &[TensorRole::Src, TensorRole::Weight, TensorRole::Dst],
            KernelKind::Softmax | KernelKind::Eltwise => &[TensorRole::Src, TensorRole::Dst],
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.roles().iter().filter(|r| r.is_input()).count()
    }

    pub fn num_outputs(&self) -> usize {
        self.roles().len() - self.num_inputs()
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelKind::Matmul => write!(f, "matmul"),
            KernelKind::Softmax => write!(f, "softmax"),
            KernelKind::Eltwise => write!(f, "eltwise"),
        }
    }
}

impl fmt::Display for KernelProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelProp::ForwardInference => write!(f, "forward_inference"),
            KernelProp::ForwardTraining => write!(f, "forward_training"),
        }
    }
}

/// Immutable description of one computation.
///
/// Construct through [`OperatorDesc::new`], which checks that the tensor
/// descriptors fit the kernel kind's role layout. Share between callers with
/// `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDesc {
    kind: KernelKind,
    prop: KernelProp,
    engine_kind: EngineKind,
    runtime_kind: RuntimeKind,
    tensor_descs: Vec<TensorDesc>,
    attrs: HashMap<String, String>,
}

impl OperatorDesc {
    pub fn new(
        kind: KernelKind,
        prop: KernelProp,
        engine_kind: EngineKind,
        runtime_kind: RuntimeKind,
        tensor_descs: Vec<TensorDesc>,
        attrs: HashMap<String, String>,
    ) -> Result<Self> {
        let roles = kind.roles();
        if tensor_descs.len() != roles.len() {
            return Err(EngineError::InvalidDescriptor(format!(
                "{} takes {} tensor descriptors, got {}",
                kind,
                roles.len(),
                tensor_descs.len()
            )));
        }
        match kind {
            KernelKind::Matmul => check_matmul(&tensor_descs)?,
            KernelKind::Softmax | KernelKind::Eltwise => check_same_layout(kind, &tensor_descs)?,
        }
        Ok(OperatorDesc {
            kind,
            prop,
            engine_kind,
            runtime_kind,
            tensor_descs,
            attrs,
        })
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    pub fn prop(&self) -> KernelProp {
        self.prop
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine_kind
    }

    pub fn runtime_kind(&self) -> RuntimeKind {
        self.runtime_kind
    }

    pub fn tensor_descs(&self) -> &[TensorDesc] {
        &self.tensor_descs
    }

    pub fn attrs(&self) -> &HashMap<String, String> {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Descriptors of the input roles, in context order.
    pub fn input_descs(&self) -> Vec<&TensorDesc> {
        self.role_descs(true)
    }

    /// Descriptors of the output roles, in context order.
    pub fn output_descs(&self) -> Vec<&TensorDesc> {
        self.role_descs(false)
    }

    /// `(M, K, N)` for a matmul descriptor.
    pub fn matmul_dims(&self) -> Option<(usize, usize, usize)> {
        if self.kind != KernelKind::Matmul {
            return None;
        }
        let (m, k) = self.tensor_descs[0].shape().as_matrix()?;
        let (_, n) = self.tensor_descs[1].shape().as_matrix()?;
        Some((m, k, n))
    }

    fn role_descs(&self, inputs: bool) -> Vec<&TensorDesc> {
        self.kind
            .roles()
            .iter()
            .zip(&self.tensor_descs)
            .filter(|(role, _)| role.is_input() == inputs)
            .map(|(_, desc)| desc)
            .collect()
    }
}

impl fmt::Display for OperatorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on {}/{} (",
            self.kind, self.prop, self.engine_kind, self.runtime_kind
        )?;
        for (i, d) in self.tensor_descs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

/// Accumulator dtype the destination of a matmul must have for a given
/// source dtype.
pub fn matmul_dst_dtype(src: DataType) -> DataType {
    match src {
        DataType::S8 | DataType::U8 => DataType::S32,
        other => other,
    }
}

fn check_matmul(descs: &[TensorDesc]) -> Result<()> {
    let (src, wei, dst) = (&descs[0], &descs[1], &descs[2]);
    let matrix = |d: &TensorDesc| {
        d.shape().as_matrix().ok_or_else(|| {
            EngineError::InvalidDescriptor(format!(
                "matmul tensors must be 2-D, got {}",
                d.shape()
            ))
        })
    };
    let (m, k) = matrix(src)?;
    let (k2, n) = matrix(wei)?;
    matrix(dst)?;
    if k != k2 {
        return Err(EngineError::InvalidDescriptor(format!(
            "matmul dimension mismatch: [{}x{}] @ [{}x{}]",
            m, k, k2, n
        )));
    }
    if dst.shape().as_matrix() != Some((m, n)) {
        return Err(EngineError::InvalidDescriptor(format!(
            "matmul destination must be [{}, {}], got {}",
            m,
            n,
            dst.shape()
        )));
    }
    if src.dtype() != wei.dtype() {
        return Err(EngineError::InvalidDescriptor(format!(
            "matmul source and weight dtypes differ: {} vs {}",
            src.dtype(),
            wei.dtype()
        )));
    }
    let expected = matmul_dst_dtype(src.dtype());
    if dst.dtype() != expected {
        return Err(EngineError::InvalidDescriptor(format!(
            "matmul destination dtype must be {} for {} inputs, got {}",
            expected,
            src.dtype(),
            dst.dtype()
        )));
    }
    Ok(())
}

fn check_same_layout(kind: KernelKind, descs: &[TensorDesc]) -> Result<()> {
    let (src, dst) = (&descs[0], &descs[1]);
    if src.shape() != dst.shape() || src.dtype() != dst.dtype() {
        return Err(EngineError::InvalidDescriptor(format!(
            "{} source {} and destination {} must match",
            kind, src, dst
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatType;

    fn td(dims: &[usize], dtype: DataType) -> TensorDesc {
        TensorDesc::new(dims, dtype, FormatType::Ab).unwrap()
    }

    fn matmul(descs: Vec<TensorDesc>) -> Result<OperatorDesc> {
        OperatorDesc::new(
            KernelKind::Matmul,
            KernelProp::ForwardInference,
            EngineKind::Gpu,
            RuntimeKind::Opencl,
            descs,
            HashMap::new(),
        )
    }

    #[test]
    fn test_matmul_dims() {
        let op = matmul(vec![
            td(&[4, 3], DataType::F32),
            td(&[3, 5], DataType::F32),
            td(&[4, 5], DataType::F32),
        ])
        .unwrap();
        assert_eq!(op.matmul_dims(), Some((4, 3, 5)));
        assert_eq!(op.input_descs().len(), 2);
        assert_eq!(op.output_descs()[0].shape().dims(), &[4, 5]);
    }

    #[test]
    fn test_matmul_inner_dim_mismatch() {
        let err = matmul(vec![
            td(&[4, 3], DataType::F32),
            td(&[2, 5], DataType::F32),
            td(&[4, 5], DataType::F32),
        ])
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_matmul_wrong_dst_shape() {
        assert!(matmul(vec![
            td(&[4, 3], DataType::F32),
            td(&[3, 5], DataType::F32),
            td(&[5, 4], DataType::F32),
        ])
        .is_err());
    }

    #[test]
    fn test_matmul_descriptor_count() {
        assert!(matmul(vec![td(&[4, 3], DataType::F32), td(&[3, 5], DataType::F32)]).is_err());
    }

    #[test]
    fn test_matmul_int8_needs_s32_dst() {
        assert!(matmul(vec![
            td(&[2, 2], DataType::S8),
            td(&[2, 2], DataType::S8),
            td(&[2, 2], DataType::S8),
        ])
        .is_err());
        assert!(matmul(vec![
            td(&[2, 2], DataType::S8),
            td(&[2, 2], DataType::S8),
            td(&[2, 2], DataType::S32),
        ])
        .is_ok());
    }

    #[test]
    fn test_roles() {
        assert_eq!(KernelKind::Matmul.num_inputs(), 2);
        assert_eq!(KernelKind::Matmul.num_outputs(), 1);
        assert_eq!(KernelKind::Softmax.num_inputs(), 1);
        assert_eq!(KernelKind::Softmax.num_outputs(), 1);
    }

    #[test]
    fn test_attrs() {
        let mut attrs = HashMap::new();
        attrs.insert("algorithm".to_string(), "gelu".to_string());
        let op = OperatorDesc::new(
            KernelKind::Eltwise,
            KernelProp::ForwardInference,
            EngineKind::Cpu,
            RuntimeKind::Undef,
            vec![td(&[2, 2], DataType::F32), td(&[2, 2], DataType::F32)],
            attrs,
        )
        .unwrap();
        assert_eq!(op.attr("algorithm"), Some("gelu"));
        assert_eq!(op.attr("missing"), None);
    }
}
