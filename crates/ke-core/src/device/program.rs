use crate::error::{EngineError, Result};

/// An OpenCL C program and the entry points its build produced.
#[derive(Debug, Clone)]
pub struct ClProgram {
    source: &'static str,
    options: String,
    kernels: Vec<String>,
    build_log: Option<String>,
}

impl ClProgram {
    pub fn new(source: &'static str, options: &str) -> Self {
        Self {
            source,
            options: options.to_string(),
            kernels: Vec::new(),
            build_log: None,
        }
    }

    pub fn source(&self) -> &str {
        self.source
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    pub fn build_log(&self) -> Option<&str> {
        self.build_log.as_deref()
    }

    /// Build the program, requiring every name in `entries` to be defined as a
    /// `__kernel` function.
    pub fn build(&mut self, entries: &[&str]) -> Result<()> {
        if self.source.trim().is_empty() {
            self.build_log = Some("empty program source".to_string());
            return Err(EngineError::Device("empty program source".to_string()));
        }
        let defined = kernel_names(self.source);
        for entry in entries {
            if !defined.iter().any(|name| name == entry) {
                let msg = format!("kernel '{}' not found in program", entry);
                self.build_log = Some(msg.clone());
                return Err(EngineError::Device(msg));
            }
        }
        self.kernels = defined;
        self.build_log = Some("build successful".to_string());
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        !self.kernels.is_empty()
    }

    pub fn has_kernel(&self, name: &str) -> bool {
        self.kernels.iter().any(|k| k == name)
    }

    /// Integer value of a `-DNAME=value` build option.
    pub fn define(&self, name: &str) -> Option<usize> {
        let prefix = format!("-D{}=", name);
        self.options
            .split_whitespace()
            .find_map(|opt| opt.strip_prefix(prefix.as_str()))
            .and_then(|v| v.parse().ok())
    }
}

fn kernel_names(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = source;
    while let Some(pos) = rest.find("__kernel") {
        rest = &rest[pos + "__kernel".len()..];
        let Some(paren) = rest.find('(') else { break };
        if let Some(name) = rest[..paren].split_whitespace().last() {
            names.push(name.to_string());
        }
        rest = &rest[paren..];
    }
    names
}

/// Two-dimensional launch geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    pub global: [usize; 2],
    pub local: [usize; 2],
}

impl NdRange {
    /// Cover `global` work items with `local`-sized work groups, padding the
    /// global size up to a multiple of the group size.
    pub fn new_2d(global: [usize; 2], local: [usize; 2]) -> Result<Self> {
        if local.contains(&0) || global.contains(&0) {
            return Err(EngineError::Device(format!(
                "invalid NDRange: global {:?}, local {:?}",
                global, local
            )));
        }
        let padded = [
            global[0].div_ceil(local[0]) * local[0],
            global[1].div_ceil(local[1]) * local[1],
        ];
        Ok(Self {
            global: padded,
            local,
        })
    }

    pub fn work_group_size(&self) -> usize {
        self.local[0] * self.local[1]
    }

    pub fn num_groups(&self) -> [usize; 2] {
        [
            self.global[0] / self.local[0],
            self.global[1] / self.local[1],
        ]
    }

    pub fn validate(&self, max_work_group_size: usize) -> Result<()> {
        if self.work_group_size() > max_work_group_size {
            return Err(EngineError::Device(format!(
                "work group of {} items exceeds device limit {}",
                self.work_group_size(),
                max_work_group_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "__kernel void scale(__global float* x) {}\n\
                       __kernel void shift(__global float* x) {}";

    #[test]
    fn test_build_finds_entries() {
        let mut p = ClProgram::new(SRC, "-DTILE=4");
        p.build(&["scale", "shift"]).unwrap();
        assert!(p.is_built());
        assert!(p.has_kernel("shift"));
        assert_eq!(p.define("TILE"), Some(4));
        assert_eq!(p.define("MISSING"), None);
    }

    #[test]
    fn test_build_missing_entry() {
        let mut p = ClProgram::new(SRC, "");
        assert!(matches!(p.build(&["gemm"]), Err(EngineError::Device(_))));
        assert!(!p.is_built());
        assert!(p.build_log().unwrap().contains("gemm"));
    }

    #[test]
    fn test_build_empty_source() {
        let mut p = ClProgram::new("   ", "");
        assert!(p.build(&[]).is_err());
    }

    #[test]
    fn test_ndrange_padding() {
        let r = NdRange::new_2d([17, 5], [8, 8]).unwrap();
        assert_eq!(r.global, [24, 8]);
        assert_eq!(r.num_groups(), [3, 1]);
        assert!(r.validate(64).is_ok());
        assert!(r.validate(32).is_err());
        assert!(NdRange::new_2d([4, 4], [0, 1]).is_err());
    }
}
