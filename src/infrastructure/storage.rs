use crate::config::S3Settings;
use aws_sdk_s3::config::{Credentials, Region};
use tracing::info;

pub async fn setup_s3_client(settings: &S3Settings) -> aws_sdk_s3::Client {
    info!(
        "☁️  S3 Storage: {} (Bucket: {}, Prefix: {})",
        settings.endpoint_url.as_deref().unwrap_or("AWS"),
        settings.bucket,
        settings.prefix
    );

    let mut loader = aws_config::from_env().region(Region::new(settings.region.clone()));
    if let Some(endpoint_url) = &settings.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }
    if let Some((access_key, secret_key)) = &settings.static_keys {
        loader = loader.credentials_provider(Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            "static",
        ));
    }
    let aws_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(settings.endpoint_url.is_some())
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}
