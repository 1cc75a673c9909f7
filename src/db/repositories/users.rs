use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_u32},
    models::{User, UserProfile},
};

impl Database {
    pub async fn insert_user(&self, profile: &UserProfile) -> Result<i64> {
        let profile = profile.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO users (name, country, age, gender, interest, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    profile.name,
                    profile.country,
                    profile.age,
                    profile.gender,
                    profile.interest,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("failed to insert user")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, country, age, gender, interest, created_at
                     FROM users WHERE id = ?1",
                    params![user_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, String>(6)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, name, country, age, gender, interest, created_at)) = row else {
                return Ok(None);
            };

            Ok(Some(User {
                id,
                profile: UserProfile {
                    name,
                    country,
                    age: age.map(|value| to_u32(value, "age")).transpose()?,
                    gender,
                    interest,
                },
                created_at: parse_datetime(&created_at, "created_at")?,
            }))
        })
        .await
    }
}
