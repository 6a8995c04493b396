//! The query subarray: a typed inclusive hyper-rectangle.

use crate::schema::CoordType;

/// Inclusive per-dimension `lo..=hi` bounds over the array domain, in the
/// domain's coordinate type.
#[derive(Debug, Clone)]
pub enum Subarray {
    I32(Vec<(i32, i32)>),
    I64(Vec<(i64, i64)>),
    F32(Vec<(f32, f32)>),
    F64(Vec<(f64, f64)>),
}

impl Subarray {
    pub fn dim_num(&self) -> usize {
        match self {
            Subarray::I32(r) => r.len(),
            Subarray::I64(r) => r.len(),
            Subarray::F32(r) => r.len(),
            Subarray::F64(r) => r.len(),
        }
    }

    pub fn coord_type(&self) -> CoordType {
        match self {
            Subarray::I32(_) => CoordType::I32,
            Subarray::I64(_) => CoordType::I64,
            Subarray::F32(_) => CoordType::F32,
            Subarray::F64(_) => CoordType::F64,
        }
    }

    /// True when every dimension collapses to a single point. A NaN
    /// endpoint is never unary.
    pub fn is_unary(&self) -> bool {
        match self {
            Subarray::I32(r) => r.iter().all(|&(lo, hi)| lo == hi),
            Subarray::I64(r) => r.iter().all(|&(lo, hi)| lo == hi),
            Subarray::F32(r) => r.iter().all(|&(lo, hi)| lo == hi),
            Subarray::F64(r) => r.iter().all(|&(lo, hi)| lo == hi),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_detection() {
        assert!(Subarray::I32(vec![(3, 3), (7, 7)]).is_unary());
        assert!(!Subarray::I32(vec![(3, 3), (0, 7)]).is_unary());
        assert!(!Subarray::F64(vec![(f64::NAN, f64::NAN)]).is_unary());
    }

    #[test]
    fn dims_and_type() {
        let s = Subarray::F32(vec![(0.0, 1.0), (2.0, 3.0), (4.0, 5.0)]);
        assert_eq!(s.dim_num(), 3);
        assert_eq!(s.coord_type(), CoordType::F32);
    }
}
