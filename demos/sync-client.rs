// OSS_ENDPOINT=https://oss.example.com OSS_BUCKET=my-bucket cargo run --example sync

use std::env;
use std::sync::Arc;

use oss::creds::{CredentialsChain, EnvProvider, ProfileProvider};
use oss::{BaseModel, BodySource, Client, Config, Marshaled, Response};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let endpoint = env::var("OSS_ENDPOINT")?;
    let bucket = env::var("OSS_BUCKET")?;

    let config = Config::new(&endpoint)?.with_max_retry_count(2);
    // Credentials are collected from the environment, then ~/.oss/credentials
    let credentials = CredentialsChain::new()
        .with_provider(EnvProvider::new())
        .with_provider(ProfileProvider::new(None));
    let client = Arc::new(Client::new(config, credentials)?);

    let key = "test.file";
    let test = b"I'm going to OSS!";

    let input = Marshaled::new()
        .header("Content-Type", "text/plain")
        .body(BodySource::from_bytes(&test[..]));
    let put: BaseModel =
        client.do_action_with_bucket_and_key("PutObject", http::Method::PUT, &bucket, key, input, true)?;
    println!("put {} -> {}", key, put.request_id);

    let response: Response =
        client.do_action_with_bucket_and_key("GetObject", http::Method::GET, &bucket, key, (), true)?;
    let body = response.into_body().bytes()?;
    assert_eq!(&body[..], &test[..]);

    let signed = client.create_signed_url(
        http::Method::GET,
        &bucket,
        key,
        300,
        Default::default(),
        Default::default(),
    )?;
    let get: Response = client.do_with_signed_url(
        "GetObject",
        http::Method::GET,
        signed.url.as_str(),
        signed.headers,
        BodySource::empty(),
    )?;
    assert_eq!(get.status(), 200);

    let deleted: BaseModel =
        client.do_action_with_bucket_and_key("DeleteObject", http::Method::DELETE, &bucket, key, (), true)?;
    assert_eq!(deleted.status_code, 204);

    client.close();
    Ok(())
}
