use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(database_url: &str) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().build(manager)
}

/// Wraps a search term for `ILIKE` substring matching.
pub fn like_pattern(term: &str) -> String {
    format!("%{}%", term.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_trims_and_wraps() {
        assert_eq!(like_pattern("  brush "), "%brush%");
        assert_eq!(like_pattern("SEW-100"), "%SEW-100%");
    }
}
