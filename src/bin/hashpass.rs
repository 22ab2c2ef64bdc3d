// Prints an Argon2 PHC string for seeding dcms_user.password_hash.
//
//   cargo run --bin hashpass -- <password>

use anyhow::{Context, anyhow};
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};

fn main() -> anyhow::Result<()> {
    let password = std::env::args()
        .nth(1)
        .context("usage: hashpass <password>")?;
    if password.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("argon2 hash error: {e}"))?;
    println!("{phc}");
    Ok(())
}
