// bot/src/utils/mod.rs
pub mod math;

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use std::path::PathBuf;
use std::str::FromStr;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Декодирование keypair из строки записи агента.
///
/// Основной формат: JSON массив из 64 байт (как в `~/.config/solana/id.json`).
/// Дополнительно принимается base58-строка (формат экспорта кошельков).
pub fn decode_keypair(secret: &str) -> Result<Keypair> {
    let secret = secret.trim();

    let keypair_bytes: Vec<u8> = if secret.starts_with('[') {
        serde_json::from_str(secret)
            .context("Неверный формат ключа (ожидается JSON массив байт)")?
    } else {
        bs58::decode(secret)
            .into_vec()
            .context("Неверный формат ключа (ожидается JSON массив или base58)")?
    };

    Keypair::try_from(&keypair_bytes[..]).map_err(|e| {
        anyhow::anyhow!(
            "Не удалось создать keypair из байтов: {}. Ожидается 64 байта, получено {}.",
            e,
            keypair_bytes.len()
        )
    })
}

/// Детерминированный адрес ATA для (владелец, минт) в классической SPL Token программе.
/// Чистая функция, без обращения к сети.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    spl_associated_token_account::get_associated_token_address_with_program_id(
        owner,
        mint,
        &spl_token::id(),
    )
}

/// Разбор адреса в Pubkey
pub fn parse_pubkey(address: &str) -> Result<Pubkey> {
    Pubkey::from_str(address.trim()).with_context(|| format!("Неверный адрес: {}", address))
}

/// Раскрытие `~` в путях из окружения
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Форматирование lamports в SOL с заданной точностью
pub fn lamports_to_sol(lamports: u64, decimals: usize) -> String {
    let sol = lamports as f64 / LAMPORTS_PER_SOL as f64;
    format!("{:.decimals$}", sol, decimals = decimals)
}
