//! Tracing subscriber setup.
//!
//! The subscriber goes up before the configuration is read, so config
//! loading is logged. `kafka.verbose` is applied afterwards by reloading
//! the filter.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Targets raised to `debug` when `kafka.verbose` is set.
const VERBOSE_TARGETS: &[&str] = &["kafka_orderer::adapters", "kafka_orderer::service"];

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_directives(verbose: bool) -> String {
    let mut directives = String::from("info");
    if verbose {
        for target in VERBOSE_TARGETS {
            directives.push(',');
            directives.push_str(target);
            directives.push_str("=debug");
        }
    }
    directives
}

/// Handle to the installed filter.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogHandle {
    /// Raise the verbose targets to `debug`. `RUST_LOG` still wins.
    pub fn apply_verbose(&self, verbose: bool) -> anyhow::Result<()> {
        if self.from_env || !verbose {
            return Ok(());
        }
        self.filter.reload(EnvFilter::try_new(default_directives(true))?)?;
        Ok(())
    }
}

fn filter_layer(
    from_env: Option<EnvFilter>,
) -> anyhow::Result<(reload::Layer<EnvFilter, Registry>, LogHandle)> {
    let handle_from_env = from_env.is_some();
    let filter = match from_env {
        Some(filter) => filter,
        None => EnvFilter::try_new(default_directives(false))?,
    };
    let (layer, filter) = reload::Layer::new(filter);
    Ok((
        layer,
        LogHandle {
            filter,
            from_env: handle_from_env,
        },
    ))
}

/// Install the global fmt subscriber at `info` (or `RUST_LOG`).
pub fn init_tracing() -> anyhow::Result<LogHandle> {
    let (filter, handle) = filter_layer(EnvFilter::try_from_default_env().ok())?;

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(handle)
}


#[cfg(test)]
mod tests {
    use super::capture::Captured;
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directives(false), "info");
        let verbose = default_directives(true);
        assert!(verbose.starts_with("info,"));
        assert!(verbose.contains("kafka_orderer::adapters=debug"));
        assert!(EnvFilter::try_new(&verbose).is_ok());
    }

    #[test]
    fn test_verbose_reload_enables_debug_targets() {
        let captured = Captured::default();
        let writer = captured.clone();
        let (filter, handle) = filter_layer(None).unwrap();
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("startup line");
            tracing::debug!(target: "kafka_orderer::adapters::kafka_broker", "quiet before");
            handle.apply_verbose(true).unwrap();
            tracing::debug!(target: "kafka_orderer::adapters::kafka_broker", "loud after");
            tracing::debug!(target: "hyper::proto", "unrelated debug");
        });

        let out = captured.contents();
        assert!(out.contains("startup line"), "{out}");
        assert!(!out.contains("quiet before"), "{out}");
        assert!(out.contains("loud after"), "{out}");
        assert!(!out.contains("unrelated debug"), "{out}");
    }

    #[test]
    fn test_rust_log_is_not_overridden() {
        let (_filter, handle) = filter_layer(Some(EnvFilter::new("warn"))).unwrap();
        assert!(handle.from_env);
        assert!(handle.apply_verbose(true).is_ok());
    }
}
