use std::time::Duration;

use hello_world::{counter_event, Counter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let nats_url =
        std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let event = counter_event();
    let events = walnats::Events::new(vec![event.raw()]);
    let conn = events.connect(&nats_url).await?;
    conn.register(true, true).await?;

    let mut value = 0;
    loop {
        conn.emit(&event, &Counter { value }, Default::default())
            .await?;
        println!("sent value {value}");
        value += 1;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}
