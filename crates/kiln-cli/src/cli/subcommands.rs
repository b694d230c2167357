use clap::Subcommand;

/// Rule file maintenance.
#[derive(Clone, Debug, Subcommand)]
pub enum RulesCommands {
    /// Load and validate the rule file, reporting rule counts per entity type.
    Check {
        /// Rule file to check instead of `import.rules_path`.
        #[arg(long)]
        path: Option<std::path::PathBuf>,
    },
}
