//! Flag parsing only; nothing here touches the host.

use std::path::Path;

use clap::Parser;
use cutover_cli::args::Cli;
use cutover_engine::{MigrationKind, PullPolicy};

#[test]
fn defaults_prepare_a_cold_migration() {
    let cli = Cli::try_parse_from(["cutover"]).expect("parse");
    assert!(!cli.migrate_all);
    assert_eq!(cli.log_level(), "info");

    let config = cli.to_config();
    assert_eq!(config.kind, MigrationKind::Cold);
    assert_eq!(config.source_package, "docker");
    assert_eq!(config.target_package, "pouch");
    assert_eq!(config.pull_policy, PullPolicy::Full);
    assert!(config.image_proxy.is_none());
    assert!(config.repull_images.is_empty());
}

#[test]
fn every_flag_maps_onto_the_config() {
    let cli = Cli::try_parse_from([
        "cutover",
        "--docker-pkg",
        "docker-ce",
        "--pouch-pkg-path",
        "/tmp/pouch-1.3.rpm",
        "--migrate-all",
        "--live-migrate",
        "--image-proxy",
        "http://proxy:3128",
        "--manifest-only",
        "--dry-run",
        "--allow-remote-disk",
        "--debug",
    ])
    .expect("parse");
    assert_eq!(cli.log_level(), "debug");

    let config = cli.to_config();
    assert_eq!(config.kind, MigrationKind::Live);
    assert_eq!(config.source_package, "docker-ce");
    assert_eq!(config.target_package, "/tmp/pouch-1.3.rpm");
    assert_eq!(config.image_proxy.as_deref(), Some("http://proxy:3128"));
    assert_eq!(config.pull_policy, PullPolicy::ManifestOnly);
    assert!(config.dry_run && config.debug && config.allow_remote_disks);
    assert_eq!(config.active_content_socket(), Path::new("/var/run/docker/containerd/docker-containerd.sock"));
}

#[test]
fn repull_images_accepts_commas_and_repeats() {
    let cli = Cli::try_parse_from([
        "cutover",
        "--repull-images",
        "nginx:1.25,redis:7",
        "--repull-images",
        "busybox",
    ])
    .expect("parse");
    let config = cli.to_config();
    let images: Vec<&str> = config.repull_images.iter().map(String::as_str).collect();
    assert_eq!(images, ["busybox", "nginx:1.25", "redis:7"]);
}

#[test]
fn unknown_flag_is_rejected() {
    assert!(Cli::try_parse_from(["cutover", "--hot-migrate"]).is_err());
}
