// Copyright 2021-2026 The Cadre Project Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Subcommand;
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;

#[derive(Subcommand, Debug)]
pub enum DatabaseCommand {
    /// Applies any pending schema migrations.
    Migrate,
}

impl DatabaseCommand {
    pub async fn run(self, config: Config) -> anyhow::Result<()> {
        match self {
            Self::Migrate => migrate(&config).await,
        }
    }
}

async fn migrate(config: &Config) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new().max_connections(1).connect(&config.database_url).await?;
    cadre_storage_pg::MIGRATOR.run(&pool).await?;
    tracing::info!("database migrations applied");
    Ok(())
}
