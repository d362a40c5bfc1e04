use dagger_sdk::{Container, Directory, HostDirectoryOpts, Query};

/// Rust image every job container starts from.
pub const RUST_IMAGE: &str = "rust:1.85-bookworm";

/// Host source tree without build output and VCS metadata.
pub fn host_directory(client: &Query, source: &str) -> Directory {
    client.host().directory_opts(
        source,
        HostDirectoryOpts {
            exclude: Some(vec!["target/", ".git/"]),
            include: None,
            gitignore: None,
            no_cache: None,
        },
    )
}

/// Rust build container with cargo caches and the source mounted at `/app`.
pub fn rust_base(client: &Query, image: &str, source: Directory) -> Container {
    client
        .container()
        .from(image)
        .with_mounted_cache(
            "/usr/local/cargo/registry",
            client.cache_volume("cargo-registry"),
        )
        .with_mounted_cache("/usr/local/cargo/git", client.cache_volume("cargo-git"))
        .with_mounted_cache("/app/target", client.cache_volume("cargo-target"))
        .with_workdir("/app")
        .with_directory("/app", source)
        .with_env_variable("CARGO_TARGET_DIR", "/app/target")
        .with_env_variable("RUST_BACKTRACE", "1")
        .with_env_variable("CI", "true")
}
