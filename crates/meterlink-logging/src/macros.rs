//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Context-enriched logging macros."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
/// Emit an informational log enriched with bridge context.
#[macro_export]
macro_rules! bridge_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            endpoint = ctx.endpoint.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            cycle = ctx.cycle.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::bridge_info!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a warning enriched with bridge context.
#[macro_export]
macro_rules! bridge_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            endpoint = ctx.endpoint.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            cycle = ctx.cycle.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::bridge_warn!(context = $crate::LogContext::default(), $($arg)+)
    }};
}
