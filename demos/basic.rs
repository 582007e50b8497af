use resilience_policy::{ExecutionError, PolicyExecutor, ResilienceConfig};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

// The clock is paused so backoff delays and break durations pass instantly.
#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let executor = PolicyExecutor::new(ResilienceConfig::default());
    let counter = AtomicU32::new(0);

    println!("Circuit initial state: {:?}", executor.circuit_state("database"));

    // Odd calls fail for the first ten invocations, then the service recovers
    for i in 1..=8 {
        println!("\nCall {}: ", i);

        let result = executor
            .execute_async(Some("database"), || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n <= 10 && n % 2 == 1 {
                        Err(ServiceError("Database connection reset".to_string()))
                    } else {
                        Ok(format!("row {}", n))
                    }
                }
            })
            .await;

        match result {
            Ok(row) => println!("Call succeeded with result: {}", row),
            Err(ExecutionError::CircuitOpen { policy }) => {
                println!("Circuit for {} is open, waiting before retry...", policy);
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Err(err) => println!("Call failed with error: {}", err),
        }

        println!("Current state: {:?}", executor.circuit_state("database"));
    }
}
