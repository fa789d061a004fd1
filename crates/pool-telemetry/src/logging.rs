//! Log macros with the standard field sets.
//!
//! Every relay-related line carries `relay_id`; every template-related line
//! carries `sequence`. Collectors filter on these fields.

/// Log a relay-related event with standard fields.
#[macro_export]
macro_rules! log_relay_event {
    ($level:ident, $component:expr, $msg:expr, $relay_id:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            relay_id = %$relay_id,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a template-related event with standard fields.
#[macro_export]
macro_rules! log_template_event {
    ($level:ident, $component:expr, $msg:expr, $template_id:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            template = %$template_id,
            $($($field)*,)?
            $msg
        )
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_expand_without_subscriber() {
        let relay = "relay-eu-1";
        crate::log_relay_event!(info, "relay_manager", "Relay registered", relay, region = "eu");
        crate::log_template_event!(debug, "applier", "Template applied", "0:7");
    }
}
