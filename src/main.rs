use std::env;
use std::path::PathBuf;

use s3cachefs::cache_dir::{
    check_dir_accessible, ensure_dir_tree, find_deepest_existing_ancestor, probe_path, purge_dir,
    DirectoryPathState,
};
use s3cachefs::config::{create_config, CacheConfig, ConfigRef};
use s3cachefs::host::launch_message;
use s3cachefs::identity::IdentityResolver;

fn parse_args(args: &[String]) -> Result<CacheConfig, String> {
    let mut config = CacheConfig::default();
    let mut i = 1;

    while i < args.len() {
        if args[i] == "-o" && i + 1 < args.len() {
            for option in args[i + 1].split(',') {
                config.apply_option(option).map_err(|e| e.to_string())?;
            }
            i += 2;
        } else {
            break;
        }
    }

    match &args[i..] {
        [] => {}
        [cache_dir] => config.cache_dir = PathBuf::from(cache_dir),
        _ => return Err("Too many arguments".to_string()),
    }

    Ok(config)
}

fn print_usage(program: &str) {
    println!("s3cachefs-preflight - provision and check the local cache directory");
    println!();
    println!("Usage: {} [-o option[,option...]] [cache_dir]", program);
    println!();
    println!("Options:");
    println!("  -o use_cache=DIR       Cache root [default: /var/cache/s3cachefs]");
    println!("  -o dir_mode=MODE       Octal mode for created directories [default: 0700]");
    println!("  -o del_cache           Purge the cache root before use");
    println!("  -o preserve_root=BOOL  Keep the cache root itself when purging [default: yes]");
}

fn preflight(config: &ConfigRef, identities: &IdentityResolver) -> Result<(), String> {
    let config = config.read().clone();
    let cache_dir = &config.cache_dir;

    if let DirectoryPathState::Partial { existing, missing } = probe_path(cache_dir) {
        tracing::info!(
            existing = %existing.display(),
            missing = %missing.display(),
            "Cache directory does not exist yet, creating it"
        );
    }

    ensure_dir_tree(cache_dir, config.dir_mode).map_err(|e| {
        let ancestor = find_deepest_existing_ancestor(cache_dir);
        tracing::error!(error = %e, errno = e.errno(), ancestor = %ancestor.display(), "Cannot create cache directory");
        format!("could not create cache directory {}: {}", cache_dir.display(), e)
    })?;

    if config.purge_on_start {
        let outcome = purge_dir(cache_dir, config.preserve_root);
        for failure in &outcome.failures {
            tracing::warn!(path = %failure.path.display(), error = %failure.error, "Could not purge cache entry");
        }
        tracing::info!(removed = outcome.removed, failures = outcome.failures.len(), "Purged cache directory");

        if outcome.root_removed {
            ensure_dir_tree(cache_dir, config.dir_mode)
                .map_err(|e| format!("could not recreate cache directory {}: {}", cache_dir.display(), e))?;
        }
    }

    if !check_dir_accessible(cache_dir) {
        let uid = nix::unistd::getuid().as_raw();
        let identity = identities.resolve(uid);
        return Err(format!(
            "cache directory {} is not readable and writable by uid {} ({})",
            cache_dir.display(),
            uid,
            identity.name.as_deref().unwrap_or("unknown user")
        ));
    }

    Ok(())
}

fn main() {
    // Initialize tracing with environment filter
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.iter().skip(1).any(|arg| arg == "-h" || arg == "--help") {
        print_usage(&args[0]);
        return;
    }

    tracing::info!("{}", launch_message(&args));

    let config = match parse_args(&args) {
        Ok(config) => create_config(config),
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    let identities = IdentityResolver::host();
    match preflight(&config, &identities) {
        Ok(()) => {
            tracing::info!(cache_dir = %config.read().cache_dir.display(), "Cache directory ready");
        }
        Err(e) => {
            tracing::error!(error = %e, "Preflight failed");
            eprintln!("Preflight failed: {}", e);
            std::process::exit(1);
        }
    }
}
