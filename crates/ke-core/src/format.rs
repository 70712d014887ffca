use std::fmt;

/// Memory layout tag of a tensor.
///
/// Letters name the logical dimensions in the order they are laid out in
/// memory, outermost first: `Ab` is a row-major matrix, `Ba` its transpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormatType {
    #[default]
    Undef,
    A,
    Ab,
    Ba,
    Abc,
}

impl FormatType {
    /// Number of dimensions this layout describes, or `None` for `Undef`.
    pub fn rank(&self) -> Option<usize> {
        match self {
            FormatType::Undef => None,
            FormatType::A => Some(1),
            FormatType::Ab | FormatType::Ba => Some(2),
            FormatType::Abc => Some(3),
        }
    }

    pub fn from_id(id: u32) -> Option<FormatType> {
        match id {
            0 => Some(FormatType::Undef),
            1 => Some(FormatType::A),
            2 => Some(FormatType::Ab),
            3 => Some(FormatType::Ba),
            4 => Some(FormatType::Abc),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            FormatType::Undef => 0,
            FormatType::A => 1,
            FormatType::Ab => 2,
            FormatType::Ba => 3,
            FormatType::Abc => 4,
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatType::Undef => write!(f, "undef"),
            FormatType::A => write!(f, "a"),
            FormatType::Ab => write!(f, "ab"),
            FormatType::Ba => write!(f, "ba"),
            FormatType::Abc => write!(f, "abc"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank() {
        assert_eq!(FormatType::Ab.rank(), Some(2));
        assert_eq!(FormatType::Ba.rank(), Some(2));
        assert_eq!(FormatType::Abc.rank(), Some(3));
        assert_eq!(FormatType::Undef.rank(), None);
    }

    #[test]
    fn test_ids() {
        assert_eq!(FormatType::from_id(FormatType::Ab.id()), Some(FormatType::Ab));
        assert!(FormatType::from_id(42).is_none());
    }
}
