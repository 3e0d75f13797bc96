//! Command-line flags.

use std::collections::BTreeSet;

use clap::Parser;
use cutover_engine::{MigrationKind, MigratorConfig, PullPolicy};

#[derive(Parser, Debug)]
#[command(name = "cutover", version, about = "Migrate containers from docker to pouch on this host")]
pub struct Cli {
    /// Source engine package name
    #[arg(long = "docker-pkg", default_value = "docker")]
    pub docker_pkg: String,

    /// Target engine package file path
    #[arg(long = "pouch-pkg-path", default_value = "pouch")]
    pub pouch_pkg_path: String,

    /// Run the whole migration; without it only prepare the data
    #[arg(long)]
    pub migrate_all: bool,

    /// Take over running containers without stopping them
    #[arg(long)]
    pub live_migrate: bool,

    /// HTTP proxy used for image pulls
    #[arg(long)]
    pub image_proxy: Option<String>,

    /// Only pull the images of the existing containers
    #[arg(long)]
    pub pull_images: bool,

    /// Images that are always fully pulled (comma separated, repeatable)
    #[arg(long, value_delimiter = ',')]
    pub repull_images: Vec<String>,

    /// Fetch only manifests and configs instead of full images
    #[arg(long)]
    pub manifest_only: bool,

    /// Keep the source package installed
    #[arg(long)]
    pub dry_run: bool,

    /// Proceed with remote disk volumes present; they are not registered
    #[arg(long = "allow-remote-disk")]
    pub allow_remote_disk: bool,

    /// Debug logging, also for the content daemon
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Migration settings for these flags on top of the defaults.
    #[must_use]
    pub fn to_config(&self) -> MigratorConfig {
        let mut config = MigratorConfig::default();
        config.kind = if self.live_migrate { MigrationKind::Live } else { MigrationKind::Cold };
        config.source_package.clone_from(&self.docker_pkg);
        config.target_package.clone_from(&self.pouch_pkg_path);
        config.dry_run = self.dry_run;
        config.debug = self.debug;
        config.image_proxy = self.image_proxy.clone().filter(|p| !p.is_empty());
        config.pull_policy = if self.manifest_only { PullPolicy::ManifestOnly } else { PullPolicy::Full };
        config.repull_images = self
            .repull_images
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .map(str::to_owned)
            .collect::<BTreeSet<_>>();
        config.allow_remote_disks = self.allow_remote_disk;
        config
    }

    /// Default log filter when `RUST_LOG` is unset.
    #[must_use]
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}
