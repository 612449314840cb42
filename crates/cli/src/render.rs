//! Terminal output.

#![allow(clippy::print_stdout)]

use chrono::{DateTime, Utc};
use shopsync_client::CollectionView;
use shopsync_core::User;

pub fn message(text: &str) {
    println!("{text}");
}

pub fn signed_in(user: &User) {
    println!("Signed in as {}", user.display_name());
}

pub fn verification_required(user: &User) {
    let email = user
        .email
        .as_ref()
        .map_or_else(|| "your inbox".to_string(), ToString::to_string);
    println!(
        "Account created for {}. Confirm the link sent to {email} before signing in.",
        user.display_name()
    );
}

pub fn user(user: &User, expiry: Option<DateTime<Utc>>) {
    println!("{}", user.display_name());
    if let Some(email) = &user.email {
        println!("  email:    {email}");
    }
    if let Some(username) = &user.username {
        println!("  username: {username}");
    }
    if let Some(expiry) = expiry {
        println!("  token expires {}", expiry.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

pub fn collection(view: &CollectionView) {
    if view.is_empty() {
        println!("Your {} is empty", view.kind);
        return;
    }

    let quantities = view.kind.tracks_quantity();
    for item in view
        .items
        .iter()
        .filter(|item| item.status.counts_toward_total())
    {
        let title = item.title.as_deref().unwrap_or("(untitled)");
        if quantities {
            println!(
                "{:>4} x {title} [{}]  {}",
                item.quantity,
                item.key,
                item.line_total()
            );
        } else {
            println!("{title} [{}]  {}", item.key, item.unit_price);
        }
    }

    if quantities {
        println!("{} item(s), total {}", view.item_count, view.total);
    }
}
