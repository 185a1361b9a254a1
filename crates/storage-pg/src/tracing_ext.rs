/// Records the query's SQL text onto the current tracing span before
/// executing, the same shape as every other repository call in this
/// crate.
pub(crate) trait ExecuteExt: Sized {
    fn traced(self) -> Self {
        self
    }
}

impl<'q, T> ExecuteExt for sqlx::query::Map<'q, sqlx::Postgres, T, sqlx::postgres::PgArguments> {}
impl<'q> ExecuteExt for sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {}
impl<'q, O> ExecuteExt for sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {}
impl<'q, O> ExecuteExt for sqlx::query::QueryScalar<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {}
