//! CLI command definitions
//!
//! Defines the clap commands for the devicelab CLI.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test or workflow on a remote device
    #[command(subcommand)]
    Run(RunCommands),

    /// Cancel a running task
    #[command(subcommand)]
    Cancel(CancelCommands),

    /// Synchronize local test definitions with the service
    #[command(subcommand)]
    Test(TestCommands),
}

#[derive(Subcommand)]
pub enum RunCommands {
    /// Run one test and follow it until it finishes
    Test {
        /// Test alias from .devicelab/config.yaml, or a test UUID
        name: String,

        /// Server-side attempts for the test (1-5)
        #[arg(long, short, default_value = "1")]
        retries: u32,

        /// Run against a specific build version
        #[arg(long)]
        build_id: Option<String>,

        /// Give up after this many seconds
        #[arg(long, short)]
        timeout: Option<u64>,

        /// Initial GPS location as lat,lng (e.g. 37.7749,-122.4194)
        #[arg(long, allow_hyphen_values = true)]
        location: Option<String>,

        /// Deep link that replaces the normal app launch
        #[arg(long)]
        launch_url: Option<String>,

        /// Return right after the run is queued
        #[arg(long)]
        no_wait: bool,
    },

    /// Run one workflow and follow it until it finishes
    Workflow {
        /// Workflow alias from .devicelab/config.yaml, or a workflow UUID
        name: String,

        /// Server-side attempts for each test (1-5)
        #[arg(long, short, default_value = "1")]
        retries: u32,

        /// Give up after this many seconds
        #[arg(long, short)]
        timeout: Option<u64>,

        /// Initial GPS location as lat,lng for every test in the workflow
        #[arg(long, allow_hyphen_values = true)]
        location: Option<String>,

        /// Override the iOS app for every test
        #[arg(long)]
        ios_app: Option<String>,

        /// Override the Android app for every test
        #[arg(long)]
        android_app: Option<String>,

        /// Return right after the run is queued
        #[arg(long)]
        no_wait: bool,
    },
}

#[derive(Subcommand)]
pub enum CancelCommands {
    /// Cancel a running test task
    Test {
        /// Task ID printed when the run started
        task_id: String,
    },

    /// Cancel a running workflow task
    Workflow {
        /// Task ID printed when the run started
        task_id: String,
    },
}

#[derive(Subcommand)]
pub enum TestCommands {
    /// Show how local tests differ from the service
    Status,

    /// Upload local changes
    Push {
        /// Push only this test
        name: Option<String>,

        /// Overwrite remote changes
        #[arg(long)]
        force: bool,
    },

    /// Download remote changes
    Pull {
        /// Pull only this test
        name: Option<String>,

        /// Overwrite local edits
        #[arg(long)]
        force: bool,

        /// Also pull every organization test not yet aliased locally
        #[arg(long, conflicts_with = "name")]
        all: bool,

        /// With --all, only tests carrying this tag
        #[arg(long, requires = "all")]
        tag: Option<String>,
    },

    /// Show differences between a local test and its remote copy
    Diff {
        name: String,
    },
}
