use crate::schema::TRACE_ENV;

/// Whether `main` installs color-eyre's report handler.
pub fn should_install_color_eyre() -> bool {
    juv_trace_enabled() || rust_backtrace_enabled()
}

fn juv_trace_enabled() -> bool {
    std::env::var_os(TRACE_ENV).is_some()
}

fn rust_backtrace_enabled() -> bool {
    std::env::var("RUST_BACKTRACE")
        .map(|value| {
            let trimmed = value.trim();
            !trimmed.is_empty() && trimmed != "0"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::should_install_color_eyre;
    use std::sync::{LazyLock, Mutex};

    static ENV_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn with_env_vars(vars: &[(&str, Option<&str>)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().expect("env lock poisoned");
        let saved: Vec<(String, Option<std::ffi::OsString>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), std::env::var_os(key)))
            .collect();

        for (key, value) in vars {
            unsafe {
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
        }

        f();

        for (key, value) in saved {
            unsafe {
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn installs_color_eyre_for_trace_env() {
        with_env_vars(&[("JUV_TRACE", Some("1")), ("RUST_BACKTRACE", None)], || {
            assert!(should_install_color_eyre());
        });
    }

    #[test]
    fn installs_color_eyre_for_backtrace_env() {
        with_env_vars(&[("JUV_TRACE", None), ("RUST_BACKTRACE", Some("1"))], || {
            assert!(should_install_color_eyre());
        });
    }

    #[test]
    fn zero_backtrace_does_not_count() {
        with_env_vars(&[("JUV_TRACE", None), ("RUST_BACKTRACE", Some("0"))], || {
            assert!(!should_install_color_eyre());
        });
    }

    #[test]
    fn skips_color_eyre_by_default() {
        with_env_vars(&[("JUV_TRACE", None), ("RUST_BACKTRACE", None)], || {
            assert!(!should_install_color_eyre());
        });
    }
}
