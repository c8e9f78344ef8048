#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    let _rocket = clip_relay::rocket().launch().await?;
    Ok(())
}
