// Master key generation tool for initial setup
// Usage: cargo run --bin gen_master_key

use casevault_phi::kms::LocalKms;

fn main() {
    let key = LocalKms::generate_master_key();

    println!("PHI_MASTER_KEY={}", key);
    println!();
    println!("Add the line above to your .env file or secret store.");
    println!("Anyone holding this key can unwrap every stored user key.");
}
