use super::{SupabaseClient, SupabaseError};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use urlencoding::encode;

/// Public URL of an object in a public bucket, `None` when there is no path.
pub fn public_object_url(base_url: &str, bucket: &str, path: &str) -> Option<String> {
    let path = path.trim().trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    let encoded = path.split('/').map(|s| encode(s).into_owned()).collect::<Vec<_>>();
    Some(format!(
        "{}/storage/v1/object/public/{bucket}/{}",
        base_url.trim_end_matches('/'),
        encoded.join("/")
    ))
}

/// Storage key for a freshly uploaded listing photo.
pub fn object_path(file_name: &str) -> String {
    let cleaned: String = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'))
        .collect();
    let cleaned = if cleaned.trim_matches('.').is_empty() {
        "foto.jpg".to_string()
    } else {
        cleaned
    };
    let nonce: u32 = rand::rng().random_range(0..1_000_000);
    format!(
        "bici-{}-{nonce:06}-{cleaned}",
        Utc::now().timestamp_millis()
    )
}

pub(super) async fn upload_object(
    client: &SupabaseClient,
    path: &str,
    bytes: Vec<u8>,
    content_type: &str,
    access_token: &str,
) -> Result<String, SupabaseError> {
    #[derive(Deserialize)]
    struct UploadResponse {
        #[serde(rename = "Key")]
        key: Option<String>,
    }

    let url = format!(
        "{}/storage/v1/object/{}/{}",
        client.base_url, client.bucket, path
    );
    let request = client
        .authorized(client.http.post(url), Some(access_token))
        .header("Content-Type", content_type)
        .header("x-upsert", "false")
        .body(bytes);
    let response = SupabaseClient::send(request).await?;
    let payload: UploadResponse = response
        .json()
        .await
        .map_err(|err| SupabaseError::Deserialize(err.to_string()))?;
    // `Key` is prefixed with the bucket; listings store the path inside it.
    let prefix = format!("{}/", client.bucket);
    Ok(payload
        .key
        .map(|key| key.trim_start_matches(&prefix).to_string())
        .unwrap_or_else(|| path.to_string()))
}

pub(super) async fn remove_objects(
    client: &SupabaseClient,
    paths: &[String],
    access_token: &str,
) -> Result<(), SupabaseError> {
    #[derive(Serialize)]
    struct RemoveRequest<'a> {
        prefixes: &'a [String],
    }

    if paths.is_empty() {
        return Ok(());
    }
    let url = format!("{}/storage/v1/object/{}", client.base_url, client.bucket);
    let request = client
        .authorized(client.http.delete(url), Some(access_token))
        .json(&RemoveRequest { prefixes: paths });
    SupabaseClient::send(request).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_for_stored_path() {
        let url = public_object_url("https://x.supabase.co/", "bike-images", "bici-1-a.jpg");
        assert_eq!(
            url.as_deref(),
            Some("https://x.supabase.co/storage/v1/object/public/bike-images/bici-1-a.jpg")
        );
    }

    #[test]
    fn public_url_absent_without_path() {
        assert!(public_object_url("https://x.supabase.co", "bike-images", "").is_none());
        assert!(public_object_url("https://x.supabase.co", "bike-images", "  ").is_none());
    }

    #[test]
    fn public_url_encodes_segments() {
        let url = public_object_url("https://x.supabase.co", "bike-images", "a b/c.jpg").unwrap();
        assert!(url.ends_with("/bike-images/a%20b/c.jpg"));
    }

    #[test]
    fn object_path_keeps_safe_file_name() {
        let path = object_path("../../mi bici<3>.jpg");
        assert!(path.starts_with("bici-"));
        assert!(path.ends_with("-mibici3.jpg"));
    }

    #[test]
    fn object_path_falls_back_for_empty_name() {
        assert!(object_path("///").ends_with("-foto.jpg"));
    }
}
