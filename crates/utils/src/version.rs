use std::sync::LazyLock;

/// Defines the application version.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{}-{}{}",
        env!("IMAGE_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        if option_env!("VERGEN_GIT_DIRTY") == Some("true") {
            "-dirty"
        } else {
            ""
        }
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_starts_with_image_version() {
        assert!(VERSION.starts_with(env!("IMAGE_VERSION")));
        assert!(!VERSION.ends_with('-'));
    }
}
