use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

use crate::application::ports::user_repository::{
    UserFilter, UserListQuery, UserRepository, WriteOutcome,
};
use crate::application::query::SortOrder;
use crate::domain::users::User;
use crate::infrastructure::db::PgPool;

const COLUMNS: &str = "id, email, password_hash, date_of_birth, hobbies, created_at, updated_at";

pub struct SqlxUserRepository {
    pub pool: PgPool,
}

impl SqlxUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_row(r: PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: r.try_get("id")?,
        email: r.try_get("email")?,
        password: r.try_get("password_hash")?,
        date_of_birth: r.try_get("date_of_birth")?,
        hobbies: r.try_get("hobbies")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(ids) = &filter.ids {
        qb.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(emails) = &filter.emails {
        qb.push(" AND email = ANY(").push_bind(emails.clone()).push(")");
    }
    for hobbies in &filter.hobbies {
        qb.push(" AND hobbies && ").push_bind(hobbies.clone());
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn insert(&self, user: &User) -> anyhow::Result<WriteOutcome> {
        let res = sqlx::query(
            r#"INSERT INTO users (id, email, password_hash, date_of_birth, hobbies, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password)
        .bind(user.date_of_birth)
        .bind(&user.hobbies)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(if res.rows_affected() > 0 {
            WriteOutcome::Written
        } else {
            WriteOutcome::Duplicate
        })
    }

    async fn replace(&self, user: &User) -> anyhow::Result<WriteOutcome> {
        let res = sqlx::query(
            r#"UPDATE users
               SET email = $2, password_hash = $3, date_of_birth = $4, hobbies = $5, updated_at = $6
               WHERE id = $1"#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password)
        .bind(user.date_of_birth)
        .bind(&user.hobbies)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;
        match res {
            Ok(r) if r.rows_affected() > 0 => Ok(WriteOutcome::Written),
            Ok(_) => Ok(WriteOutcome::NotFound),
            Err(e) if is_unique_violation(&e) => Ok(WriteOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(map_row).transpose()?)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(map_row).transpose()?)
    }

    async fn list(&self, query: &UserListQuery) -> anyhow::Result<Vec<User>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM users"));
        push_filter(&mut qb, &query.filter);
        qb.push(" ORDER BY ");
        for (field, order) in &query.sort {
            let dir = match order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            qb.push(field.column()).push(" ").push(dir).push(", ");
        }
        qb.push("created_at ASC, id ASC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        if query.skip > 0 {
            qb.push(" OFFSET ").push_bind(query.skip as i64);
        }
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(map_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn count(&self, filter: &UserFilter) -> anyhow::Result<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM users");
        push_filter(&mut qb, filter);
        let row = qb.build().fetch_one(&self.pool).await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
