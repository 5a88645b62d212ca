//! Command implementations
//!
//! Thin glue over `spr-auth` and `spr-client`: gather missing inputs
//! interactively, run the grant or call, and report the outcome on stdout.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use common::Secret;
use reqwest::Method;
use spr_auth::{
    ClientApp, CredentialMap, Environment, GrantRequest, ReuseSelector,
    build_authorization_url,
};
use spr_client::{ApiRequest, Client, ClientSettings};
use tracing::info;

use crate::cli::{AppArgs, CallArgs, OauthArgs, PasswordAuthArgs, SelectArgs};

pub async fn password_auth(settings: &ClientSettings, args: PasswordAuthArgs) -> Result<()> {
    let (environment, app) = resolve_app(args.app)?;
    let username = value_or_prompt(args.username, "Email")?;
    let password = match args.password {
        Some(p) => Secret::new(p),
        None => Secret::new(rpassword::prompt_password("Password: ").context("reading password")?),
    };
    if password.is_blank() {
        bail!("Please fill in all mandatory parameters");
    }

    println!("Authenticating user to {environment} : {username}");
    Client::connect(
        settings,
        GrantRequest::Password {
            environment,
            app,
            username,
            password,
        },
    )
    .await
    .context("password authentication failed")?;
    println!("Success!");
    Ok(())
}

pub async fn oauth(settings: &ClientSettings, args: OauthArgs) -> Result<()> {
    let (environment, app) = resolve_app(args.app)?;

    let code = match args.authorization_code {
        Some(code) => code,
        None => {
            let url = build_authorization_url(
                &settings.base_url,
                &environment,
                &app.key,
                &app.redirect_uri,
            )?;
            println!(
                "Please click or copy paste the link in your browser to authorize access to \
                 your {environment} environment. {url}"
            );
            prompt("Please enter the authorization code returned to your redirect url")?
        }
    };

    println!("Authenticating user to {environment}");
    Client::connect(
        settings,
        GrantRequest::AuthorizationCode {
            environment,
            app,
            code,
        },
    )
    .await
    .context("authorization code exchange failed")?;
    println!("Success!");
    Ok(())
}

pub async fn list(settings: &ClientSettings) -> Result<()> {
    let store = settings.open_store().await?;
    let map = store.load().await?;
    if map.is_empty() {
        println!("No stored credentials in {}", store.location());
        return Ok(());
    }
    for line in format_listing(&map, now_secs()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn logout(settings: &ClientSettings, args: SelectArgs) -> Result<()> {
    let store = settings.open_store().await?;
    let (environment, key, _) = selector(args).resolve(&store.load().await?)?;
    store.remove(&environment, &key).await?;
    info!(environment = %environment, key = %key, "removed stored credential");
    println!("Removed {environment}/{key}");
    Ok(())
}

pub async fn call(settings: &ClientSettings, args: CallArgs) -> Result<()> {
    let request = build_request(&args)?;
    let store = Arc::new(settings.open_store().await?);
    let client = Client::connect_with_store(settings, GrantRequest::Reuse(selector(args.select)), store)
        .await?;
    let data = client
        .request(&request)
        .await
        .with_context(|| format!("{} {} failed", request.method, request.endpoint))?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

fn selector(args: SelectArgs) -> ReuseSelector {
    ReuseSelector {
        environment: args.environment.map(Environment::from),
        key: args.key,
    }
}

fn resolve_app(args: AppArgs) -> Result<(Environment, ClientApp)> {
    let key = value_or_prompt(args.client_id, "Application Client Id")?;
    let secret = value_or_prompt(args.client_secret, "Application Client Secret")?;
    let redirect_uri = value_or_prompt(args.redirect_url, "Application Redirect Link")?;
    Ok((
        Environment::from(args.environment),
        ClientApp::new(key, secret, redirect_uri),
    ))
}

fn build_request(args: &CallArgs) -> Result<ApiRequest> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method: {}", args.method))?;
    let mut request = ApiRequest::new(method, args.endpoint.clone());
    if let Some(body) = &args.body {
        let json = serde_json::from_str(body).context("--body must be valid JSON")?;
        request = request.json(json);
    }
    for pair in &args.query {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("query parameter must be NAME=VALUE, got: {pair}");
        };
        request = request.query(name, value);
    }
    Ok(request)
}

fn format_listing(map: &CredentialMap, now: u64) -> Vec<String> {
    map.iter()
        .flat_map(|(env, keys)| {
            keys.iter().map(move |(key, record)| {
                let state = if record.expires_at <= now {
                    "expired".to_string()
                } else {
                    format!("valid for {}s", record.expires_at - now)
                };
                format!("{env}\t{key}\texpires_at={}\t{state}", record.expires_at)
            })
        })
        .collect()
}

fn value_or_prompt(value: Option<String>, label: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => prompt(label),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    read_value(&mut std::io::stdin().lock())
}

fn read_value(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line).context("reading input")?;
    let value = line.trim();
    if value.is_empty() {
        bail!("Please fill in all mandatory parameters");
    }
    Ok(value.to_owned())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spr_auth::{CredentialRecord, CredentialStore};

    fn record(expires_at: u64) -> CredentialRecord {
        CredentialRecord {
            secret: Secret::from("s"),
            redirect_uri: "r".into(),
            access_token: Secret::from("at"),
            refresh_token: Secret::from("rt"),
            expires_at,
        }
    }

    fn call_args(method: &str, body: Option<&str>, query: &[&str]) -> CallArgs {
        CallArgs {
            method: method.into(),
            endpoint: "reports/query".into(),
            select: SelectArgs {
                environment: None,
                key: None,
            },
            body: body.map(String::from),
            query: query.iter().map(|q| q.to_string()).collect(),
        }
    }

    #[test]
    fn read_value_trims_and_rejects_empty() {
        let mut input = std::io::Cursor::new("  k1  \n");
        assert_eq!(read_value(&mut input).unwrap(), "k1");

        let mut empty = std::io::Cursor::new("\n");
        assert!(read_value(&mut empty).is_err());
    }

    #[test]
    fn build_request_parses_method_body_and_query() {
        let request =
            build_request(&call_args("post", Some(r#"{"page":1}"#), &["size=10", "q=a=b"])).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body.unwrap()["page"], 1);
        assert_eq!(
            request.params,
            vec![
                ("size".to_string(), "10".to_string()),
                ("q".to_string(), "a=b".to_string())
            ]
        );
    }

    #[test]
    fn build_request_rejects_bad_input() {
        assert!(build_request(&call_args("GET", Some("{not json"), &[])).is_err());
        assert!(build_request(&call_args("GET", None, &["novalue"])).is_err());
    }

    #[test]
    fn listing_hides_secrets_and_marks_expiry() {
        let mut map = CredentialMap::new();
        map.entry("prod".into()).or_default().insert("k1".into(), record(1_000));
        map.entry("qa4".into()).or_default().insert("k2".into(), record(5_000));

        let lines = format_listing(&map, 2_000);
        assert_eq!(
            lines,
            vec![
                "prod\tk1\texpires_at=1000\texpired",
                "qa4\tk2\texpires_at=5000\tvalid for 3000s",
            ]
        );
    }

    #[tokio::test]
    async fn logout_removes_selected_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::open(path.clone()).await.unwrap();
        store.upsert(&Environment::from("qa4"), "k1", record(9)).await.unwrap();
        store.upsert(&Environment::from("qa4"), "k2", record(9)).await.unwrap();

        let settings = ClientSettings {
            credentials_path: Some(path),
            ..ClientSettings::default()
        };
        logout(
            &settings,
            SelectArgs {
                environment: Some("qa4".into()),
                key: Some("k1".into()),
            },
        )
        .await
        .unwrap();

        let map = store.load().await.unwrap();
        assert!(!map["qa4"].contains_key("k1"));
        assert!(map["qa4"].contains_key("k2"));
    }
}
