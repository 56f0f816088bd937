//! Parameterized query filters
//!
//! Conditions are always pushed through bind parameters, never formatted
//! into SQL text. The same filter type serves the merge scan and the backup
//! snapshot, so both narrow their reads identically.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

/// Optional narrowing conditions for trade-table scans.
#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub species_ids: Option<Vec<Uuid>>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
}

impl TradeFilter {
    pub fn for_species(ids: Vec<Uuid>) -> Self {
        Self {
            species_ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.species_ids.is_none() && self.year_from.is_none() && self.year_to.is_none()
    }

    /// Append `WHERE ...` to a builder. No-op when unfiltered.
    pub fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        let mut prefix = " WHERE ";
        if let Some(ids) = &self.species_ids {
            builder.push(prefix).push("species_id = ANY(");
            builder.push_bind(ids.clone()).push(")");
            prefix = " AND ";
        }
        if let Some(from) = self.year_from {
            builder.push(prefix).push("year >= ").push_bind(from);
            prefix = " AND ";
        }
        if let Some(to) = self.year_to {
            builder.push(prefix).push("year <= ").push_bind(to);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unfiltered_appends_nothing() {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT * FROM cites_trade_records");
        TradeFilter::default().push_where(&mut builder);
        assert_eq!(builder.sql(), "SELECT * FROM cites_trade_records");
    }

    #[test]
    fn test_conditions_use_bind_parameters() {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT * FROM cites_trade_records");
        let filter = TradeFilter {
            species_ids: Some(vec![Uuid::new_v4()]),
            year_from: Some(1990),
            year_to: Some(2020),
        };
        filter.push_where(&mut builder);
        let sql = builder.sql();
        assert!(sql.contains("species_id = ANY($1)"));
        assert!(sql.contains("year >= $2"));
        assert!(sql.contains("year <= $3"));
        // No inline literals.
        assert!(!sql.contains("1990"));
    }
}
