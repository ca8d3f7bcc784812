use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum BandwidthUnit {
    Kbps = 1000,
    Mbps = 1_000_000,
    Gbps = 1_000_000_000,
}

impl std::fmt::Display for BandwidthUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use BandwidthUnit::*;
        match self {
            Kbps => write!(f, "Kb/s"),
            Mbps => write!(f, "Mb/s"),
            Gbps => write!(f, "Gb/s"),
        }
    }
}

pub trait BandwidthTrait {
    fn kbps(self) -> Bandwidth;
    fn mbps(self) -> Bandwidth;
    fn gbps(self) -> Bandwidth;
}

/// A link rate. The value is always stored in bits per second; the unit
/// only picks the scale used for display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bandwidth {
    val: u64,
    unit: BandwidthUnit,
}

impl Bandwidth {
    /// bits per second
    #[inline]
    pub fn val(&self) -> u64 {
        self.val
    }

    /// Scale the rate, e.g. by a configured rate multiplier.
    #[inline]
    pub fn scale(self, factor: f64) -> Bandwidth {
        Bandwidth {
            val: (self.val as f64 * factor).round() as u64,
            unit: self.unit,
        }
    }
}

impl std::fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            self.val as f64 / self.unit as u64 as f64,
            self.unit
        )
    }
}

impl std::cmp::PartialEq for Bandwidth {
    fn eq(&self, other: &Self) -> bool {
        self.val().eq(&other.val())
    }
}

impl Eq for Bandwidth {}

impl std::cmp::PartialOrd for Bandwidth {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for Bandwidth {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.val().cmp(&other.val())
    }
}

impl std::ops::Add for Bandwidth {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Bandwidth {
            val: self.val + rhs.val,
            unit: self.unit,
        }
    }
}

impl std::ops::Sub for Bandwidth {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Bandwidth {
            val: self.val - rhs.val,
            unit: self.unit,
        }
    }
}

macro_rules! impl_bandwidth_trait_for {
    ($($ty:ty),+ $(,)?) => (
        $(impl BandwidthTrait for $ty
        {
            fn kbps(self) -> Bandwidth {
                let unit = BandwidthUnit::Kbps;
                Bandwidth {
                    val: (self as f64 * unit as u64 as f64) as u64,
                    unit,
                }
            }
            fn mbps(self) -> Bandwidth {
                let unit = BandwidthUnit::Mbps;
                Bandwidth {
                    val: (self as f64 * unit as u64 as f64) as u64,
                    unit,
                }
            }
            fn gbps(self) -> Bandwidth {
                let unit = BandwidthUnit::Gbps;
                Bandwidth {
                    val: (self as f64 * unit as u64 as f64) as u64,
                    unit,
                }
            }
        })+
    )
}

impl_bandwidth_trait_for!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64, isize, usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_the_constructing_unit() {
        let a: Bandwidth = 5.mbps();
        assert_eq!(a.val(), 5_000_000);
        assert_eq!(format!("{}", a), "5 Mb/s");
        assert_eq!(format!("{}", 1500.kbps()), "1500 Kb/s");
    }

    #[test]
    fn comparison_ignores_units() {
        assert_eq!(1.gbps(), 1000.mbps());
        assert!(1.mbps() < (1.5).mbps());
        assert_eq!((1.mbps() + 1.mbps()).val(), 2_000_000);
    }

    #[test]
    fn scale_applies_a_rate_multiplier() {
        assert_eq!(5.mbps().scale(2.0), 10.mbps());
        assert_eq!(1.gbps().scale(0.5), 500.mbps());
    }
}
