use serde::{Deserialize, Serialize};

use crate::domain::offer::SupplierId;

/// Per-supplier usage counter. `used <= capacity` holds after every
/// successful increment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapacityRecord {
    #[serde(rename = "SupplierID")]
    pub supplier_id: SupplierId,
    pub capacity: u32,
    pub used: u32,
    pub used_pct: f64,
}

impl CapacityRecord {
    pub fn new(supplier_id: SupplierId, capacity: u32) -> Self {
        Self { supplier_id, capacity, used: 0, used_pct: 0.0 }
    }

    /// Consumes one unit. On refusal the record is left untouched and the
    /// current `(used, capacity)` pair is returned.
    pub fn try_increment(&mut self) -> Result<(), (u32, u32)> {
        let next = self.used.checked_add(1).filter(|next| *next <= self.capacity);
        let Some(next) = next else {
            return Err((self.used, self.capacity));
        };
        self.used = next;
        self.used_pct = used_pct(self.used, self.capacity);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.used = 0;
        self.used_pct = 0.0;
    }
}

/// Fraction of capacity in use, rounded to two decimals; zero capacity reads as 0.
pub fn used_pct(used: u32, capacity: u32) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    (f64::from(used) / f64::from(capacity) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::{used_pct, CapacityRecord};
    use crate::domain::offer::SupplierId;

    #[test]
    fn increment_stops_at_capacity() {
        let mut record = CapacityRecord::new(SupplierId::from("S1"), 2);

        assert!(record.try_increment().is_ok());
        assert!(record.try_increment().is_ok());
        assert_eq!(record.try_increment(), Err((2, 2)));
        assert_eq!(record.used, 2);
        assert_eq!(record.used_pct, 1.0);
    }

    #[test]
    fn zero_capacity_never_accepts() {
        let mut record = CapacityRecord::new(SupplierId::from("S0"), 0);
        assert_eq!(record.try_increment(), Err((0, 0)));
        assert_eq!(record.used_pct, 0.0);
        assert_eq!(used_pct(0, 0), 0.0);
    }

    #[test]
    fn reset_clears_usage() {
        let mut record = CapacityRecord::new(SupplierId::from("S1"), 4);
        record.try_increment().expect("room");
        record.reset();
        assert_eq!((record.used, record.used_pct, record.capacity), (0, 0.0, 4));
    }
}
