//! Enqueue a mix of messages and watch the high-priority actor win the
//! single job slot. Needs a JetStream-enabled server, e.g.
//! `nats-server -js`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use walnats::{Actor, Actors, EmitOpts, Event, Events, ListenOpts, Priority};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let nats_url =
        std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let event = Event::<String>::new("ticket-bought");
    let order = Arc::new(Mutex::new(Vec::<String>::new()));

    let make_actor = |name: &str, priority: Priority| {
        let order = order.clone();
        Actor::new(name, event.clone(), move |msg: String| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(format!("{priority}: {msg}"));
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        })
        .priority(priority)
    };
    let audit = make_actor("audit-log", Priority::Low);
    let confirm = make_actor("send-confirmation", Priority::High);

    let events = Events::new(vec![event.raw()]);
    let actors = Actors::new(vec![audit.raw(), confirm.raw()]);

    // publisher and subscriber share one connection
    let client = walnats::connect(&nats_url).await?;
    let pub_conn = events.with_client(client.clone());
    let sub_conn = actors.with_client(client);
    pub_conn.register(true, true).await?;
    sub_conn.register().await?;

    for i in 1..=4 {
        pub_conn
            .emit(&event, &format!("ticket-{i}"), EmitOpts::default())
            .await?;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    // one global job slot makes the two actors take turns
    sub_conn
        .listen(ListenOpts::default().burst().batch(4).max_jobs(1))
        .await?;

    println!("observed order:");
    for line in order.lock().unwrap().iter() {
        println!("  {line}");
    }
    Ok(())
}
