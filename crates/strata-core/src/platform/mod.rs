pub mod paths;

/// Return the system hostname, or `"unknown"` if it cannot be determined.
pub fn hostname() -> String {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".into())
    }

    #[cfg(windows)]
    {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".into())
    }
}

/// Name of the effective user, falling back to `$USER`/`$USERNAME`.
pub fn username() -> String {
    #[cfg(unix)]
    {
        use nix::unistd::{Uid, User};
        if let Ok(Some(user)) = User::from_uid(Uid::effective()) {
            return user.name;
        }
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".into())
}
