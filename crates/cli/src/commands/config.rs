// Effective configuration command

use crate::output::{format_millis, print_field, print_section, OutputFormat};
use anyhow::Result;
use juris_resilience::ResilienceConfig;

pub fn run(output: OutputFormat) -> Result<()> {
    let config = ResilienceConfig::from_env();
    let validation = config.validate();

    if !output.is_text() {
        return output.print_value(&serde_json::json!({
            "config": config,
            "valid": validation.is_ok(),
            "error": validation.err().map(|e| e.to_string()),
        }));
    }

    print_section("Circuit breaker");
    let breaker = &config.breaker;
    print_field("Failure threshold", &breaker.failure_threshold.to_string());
    print_field("Success threshold", &breaker.success_threshold.to_string());
    print_field("Open duration", &format_millis(breaker.open_duration));
    print_field("Call timeout", &format_millis(breaker.call_timeout));
    print_field("Half-open in flight", &breaker.half_open_max_in_flight.to_string());

    print_section("Rate limit");
    let limit = &config.rate_limit;
    print_field("Enabled", &config.rate_limiting.to_string());
    print_field("Window", &format_millis(limit.window));
    print_field("Max requests", &limit.max_requests.to_string());
    print_field("Key prefix", &limit.key_prefix);
    print_field("Max keys", &limit.max_keys.to_string());

    print_section("Retry");
    let retry = &config.retry;
    print_field("Max attempts", &retry.max_attempts.to_string());
    print_field("Initial interval", &format_millis(retry.initial_interval));
    print_field("Max interval", &format_millis(retry.max_interval));
    print_field("Backoff coefficient", &retry.backoff_coefficient.to_string());
    print_field("Jitter", &retry.jitter.to_string());

    print_section("Coordinator");
    let coordinator = &config.coordinator;
    print_field("Attempt timeout", &format_millis(coordinator.attempt_timeout));
    print_field("Run timeout", &format_millis(coordinator.run_timeout));
    print_field("Default policy", coordinator.default_policy.as_str());

    println!();
    match validation {
        Ok(()) => println!("Configuration is valid"),
        Err(e) => println!("Configuration is invalid: {}", e),
    }

    Ok(())
}
