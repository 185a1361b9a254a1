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

use cadre_storage::SchedulerStatusRepository;
use cadre_storage_pg::PgSchedulerStatusRepository;

use crate::config::Config;

#[derive(Subcommand, Debug)]
pub enum SchedulerCommand {
    /// Prints the last recorded heartbeat and registered job list for this
    /// service name, without starting a scheduler of its own.
    Status,
}

impl SchedulerCommand {
    pub async fn run(self, config: Config) -> anyhow::Result<()> {
        match self {
            Self::Status => status(&config).await,
        }
    }
}

async fn status(config: &Config) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new().max_connections(1).connect(&config.database_url).await?;
    let mut conn = pool.acquire().await?;

    match PgSchedulerStatusRepository::new(&mut conn, config.scheduler_config().service_name).read().await? {
        Some(status) => {
            println!("service:        {}", status.service_name);
            println!("running:        {}", status.is_running);
            println!("last heartbeat: {}", status.last_heartbeat);
            println!("jobs:");
            for job in status.jobs {
                println!("  - {} ({}) next_run={:?} trigger={}", job.name, job.id, job.next_run, job.trigger);
            }
        }
        None => println!("no heartbeat recorded yet for this service"),
    }

    Ok(())
}
