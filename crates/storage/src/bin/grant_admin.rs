use std::env;
use std::process;

use law_journal_domain::config::hydrate_env_file;
use law_journal_domain::model::{ProfileRecord, UserId};
use law_journal_domain::storage::ProfileStore;
use law_journal_storage::SeaOrmStorage;

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let (Some(user_id), Some(email), Some(display_name)) = (args.next(), args.next(), args.next())
    else {
        eprintln!("Usage: grant_admin <user_id> <email> <display_name> [editor_role]");
        process::exit(1);
    };
    let editor_role = args.next();

    let Some(user_id) = UserId::parse(&user_id) else {
        eprintln!("user id must not be blank");
        process::exit(1);
    };

    if let Err(err) = hydrate_env_file() {
        eprintln!("failed to load .env: {err}");
        process::exit(1);
    }
    let database_url = match env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL must be set");
            process::exit(1);
        }
    };

    let storage = match SeaOrmStorage::connect(&database_url).await {
        Ok(storage) => storage,
        Err(err) => {
            eprintln!("failed to open database: {err}");
            process::exit(1);
        }
    };

    let existing = match storage.find_profile(&user_id).await {
        Ok(existing) => existing,
        Err(err) => {
            eprintln!("failed to read profile: {err}");
            process::exit(1);
        }
    };
    let profile = ProfileRecord {
        user_id,
        is_admin: true,
        email,
        display_name,
        editor_role: editor_role.or_else(|| existing.as_ref().and_then(|p| p.editor_role.clone())),
        institution: existing.as_ref().and_then(|p| p.institution.clone()),
        display_order: existing.as_ref().and_then(|p| p.display_order),
    };

    match storage.upsert_profile(profile).await {
        Ok(profile) => println!("Granted admin to {} <{}>", profile.user_id, profile.email),
        Err(err) => {
            eprintln!("failed to save profile: {err}");
            process::exit(1);
        }
    }
}
