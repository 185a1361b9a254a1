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

pub mod database;
pub mod scheduler;
pub mod server;

use clap::Subcommand;

use crate::config::Config;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs the HTTP surface and the background scheduler in-process.
    Server,
    /// Database maintenance.
    #[command(subcommand)]
    Database(database::DatabaseCommand),
    /// Background scheduler inspection.
    #[command(subcommand)]
    Scheduler(scheduler::SchedulerCommand),
}

impl Command {
    pub async fn run(self, config: Config) -> anyhow::Result<()> {
        match self {
            Self::Server => server::run(config).await,
            Self::Database(cmd) => cmd.run(config).await,
            Self::Scheduler(cmd) => cmd.run(config).await,
        }
    }
}
