use hello_world::{counter_event, Counter};

async fn print_counter(counter: Counter) -> Result<(), walnats::BoxError> {
    println!("got value {}", counter.value);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let nats_url =
        std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let actor = walnats::Actor::new("print-counter", counter_event(), print_counter);
    let actors = walnats::Actors::new(vec![actor.raw()]);
    let conn = actors.connect(&nats_url).await?;
    conn.register().await?;
    conn.listen_with_signal(Default::default(), async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}
