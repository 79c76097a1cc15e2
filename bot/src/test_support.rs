// bot/src/test_support.rs
// Общие заглушки коллабораторов для unit-тестов

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::json;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::QuoteError;
use crate::ledger::{Confirmation, LedgerClient, SubmitOptions};
use crate::quote::{InstructionDescriptor, Quote, QuoteProvider, QuoteRequest, SwapInstructions};
use crate::store::{AgentStore, LogSink};
use crate::types::{AgentRecord, AgentStatus, LogEvent, LogLevel, RunStateUpdate, TradeSide};

pub fn sample_record(id: &str) -> AgentRecord {
    let keypair = Keypair::new();
    AgentRecord {
        id: id.to_string(),
        ledger_endpoint: None,
        quote_endpoint: None,
        secret_key: serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap(),
        base_mint: Pubkey::new_unique().to_string(),
        quote_mint: Pubkey::new_unique().to_string(),
        initial_side: TradeSide::Base,
        initial_amount: 1_000_000,
        initial_price_threshold: 2_000_000,
        target_gain_percentage: 1.0,
        poll_interval_ms: None,
        status: AgentStatus::Deactivated,
        worker: None,
        last_balances: None,
    }
}

pub fn sample_quote(input_mint: Pubkey, output_mint: Pubkey, in_amount: u64, out_amount: u64) -> Quote {
    Quote {
        input_mint,
        output_mint,
        in_amount,
        out_amount,
        raw: json!({
            "inputMint": input_mint.to_string(),
            "outputMint": output_mint.to_string(),
            "inAmount": in_amount.to_string(),
            "outAmount": out_amount.to_string(),
            "slippageBps": 50,
            "routePlan": []
        }),
    }
}

pub fn descriptor(program_id: Pubkey, data: &[u8]) -> InstructionDescriptor {
    InstructionDescriptor {
        program_id: program_id.to_string(),
        accounts: vec![],
        data: BASE64.encode(data),
    }
}

pub fn simple_instructions() -> SwapInstructions {
    SwapInstructions {
        compute_budget_instructions: vec![descriptor(solana_sdk::compute_budget::id(), &[2, 0, 0])],
        swap_instruction: Some(descriptor(Pubkey::new_unique(), &[1, 2, 3])),
        ..Default::default()
    }
}

/// Аккаунт lookup-таблицы в on-chain раскладке: 56 байт метаданных + адреса
pub fn lookup_table_account(addresses: &[Pubkey]) -> Account {
    const META_SIZE: usize = 56;

    let mut data = Vec::with_capacity(META_SIZE + addresses.len() * 32);
    data.extend_from_slice(&1u32.to_le_bytes()); // ProgramState::LookupTable
    data.extend_from_slice(&u64::MAX.to_le_bytes()); // deactivation_slot
    data.extend_from_slice(&0u64.to_le_bytes()); // last_extended_slot
    data.push(0); // last_extended_slot_start_index
    data.push(0); // authority: None
    data.resize(META_SIZE, 0);
    for address in addresses {
        data.extend_from_slice(address.as_ref());
    }

    Account {
        lamports: 1_000_000,
        data,
        owner: solana_sdk::address_lookup_table::program::id(),
        executable: false,
        rent_epoch: 0,
    }
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct MockLedger {
    native: Mutex<u64>,
    native_script: Mutex<VecDeque<Result<u64, String>>>,
    token_balances: Mutex<HashMap<Pubkey, u64>>,
    failing_token_accounts: Mutex<Vec<Pubkey>>,
    accounts: Mutex<HashMap<Pubkey, Account>>,
    submitted: Mutex<Vec<Vec<u8>>>,
    submit_options: Mutex<Vec<SubmitOptions>>,
    submit_error: Mutex<Option<String>>,
    confirmation: Mutex<Confirmation>,
    confirm_delay: Mutex<Option<Duration>>,
    confirms_active: AtomicUsize,
    max_concurrent_confirms: AtomicUsize,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self {
            native: Mutex::new(1_000_000_000),
            native_script: Mutex::new(VecDeque::new()),
            token_balances: Mutex::new(HashMap::new()),
            failing_token_accounts: Mutex::new(Vec::new()),
            accounts: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            submit_options: Mutex::new(Vec::new()),
            submit_error: Mutex::new(None),
            confirmation: Mutex::new(Confirmation::default()),
            confirm_delay: Mutex::new(None),
            confirms_active: AtomicUsize::new(0),
            max_concurrent_confirms: AtomicUsize::new(0),
        }
    }
}

impl MockLedger {
    pub fn set_native_balance(&self, lamports: u64) {
        *self.native.lock().unwrap() = lamports;
    }

    /// Ответы `get_balance` по очереди; после исчерпания действует `set_native_balance`
    pub fn push_native(&self, result: Result<u64, &str>) {
        self.native_script
            .lock()
            .unwrap()
            .push_back(result.map_err(str::to_string));
    }

    pub fn set_token_balance(&self, account: Pubkey, amount: u64) {
        self.token_balances.lock().unwrap().insert(account, amount);
    }

    pub fn fail_token_account(&self, account: Pubkey) {
        self.failing_token_accounts.lock().unwrap().push(account);
    }

    pub fn put_account(&self, key: Pubkey, account: Account) {
        self.accounts.lock().unwrap().insert(key, account);
    }

    pub fn fail_submit(&self, reason: &str) {
        *self.submit_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn set_confirmation(&self, confirmation: Confirmation) {
        *self.confirmation.lock().unwrap() = confirmation;
    }

    pub fn set_confirm_delay(&self, delay: Duration) {
        *self.confirm_delay.lock().unwrap() = Some(delay);
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn last_submit_options(&self) -> Option<SubmitOptions> {
        self.submit_options.lock().unwrap().last().copied()
    }

    pub fn max_concurrent_confirms(&self) -> usize {
        self.max_concurrent_confirms.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_balance(&self, _pubkey: &Pubkey) -> Result<u64> {
        match self.native_script.lock().unwrap().pop_front() {
            Some(Ok(lamports)) => Ok(lamports),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Ok(*self.native.lock().unwrap()),
        }
    }

    async fn get_token_account_balance(&self, account: &Pubkey) -> Result<u64> {
        if self.failing_token_accounts.lock().unwrap().contains(account) {
            return Err(anyhow!("token account fetch failed"));
        }
        Ok(self.token_balances.lock().unwrap().get(account).copied().unwrap_or(0))
    }

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64)> {
        Ok((Hash::new_unique(), 1_000))
    }

    async fn submit(&self, raw_transaction: &[u8], options: SubmitOptions) -> Result<Signature> {
        self.submit_options.lock().unwrap().push(options);
        if let Some(reason) = self.submit_error.lock().unwrap().clone() {
            return Err(anyhow!(reason));
        }
        self.submitted.lock().unwrap().push(raw_transaction.to_vec());
        Ok(Signature::new_unique())
    }

    async fn confirm(
        &self,
        _signature: &Signature,
        _blockhash: &Hash,
        _last_valid_block_height: u64,
        _commitment: CommitmentConfig,
    ) -> Result<Confirmation> {
        let active = self.confirms_active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_confirms.fetch_max(active, Ordering::SeqCst);

        let delay = *self.confirm_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.confirms_active.fetch_sub(1, Ordering::SeqCst);
        Ok(self.confirmation.lock().unwrap().clone())
    }

    async fn get_multiple_accounts(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        let accounts = self.accounts.lock().unwrap();
        Ok(keys.iter().map(|key| accounts.get(key).cloned()).collect())
    }
}

// ============================================================================
// QUOTES
// ============================================================================

pub enum ScriptedQuote {
    /// Котировка под запрос с заданным выходом
    Out(u64),
    Error(QuoteError),
    /// Готовая котировка как есть (например, для чужой пары)
    Raw(Quote),
}

pub struct MockQuotes {
    script: Mutex<VecDeque<ScriptedQuote>>,
    fallback_out: Mutex<Option<u64>>,
    instructions: Mutex<Result<SwapInstructions, QuoteError>>,
    requests: Mutex<Vec<QuoteRequest>>,
    instruction_calls: AtomicUsize,
}

impl Default for MockQuotes {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback_out: Mutex::new(None),
            instructions: Mutex::new(Ok(simple_instructions())),
            requests: Mutex::new(Vec::new()),
            instruction_calls: AtomicUsize::new(0),
        }
    }
}

impl MockQuotes {
    pub fn push(&self, scripted: ScriptedQuote) {
        self.script.lock().unwrap().push_back(scripted);
    }

    /// Ответ, когда сценарий исчерпан; без него сервис отвечает "нет маршрута"
    pub fn set_fallback_out(&self, out_amount: u64) {
        *self.fallback_out.lock().unwrap() = Some(out_amount);
    }

    pub fn set_instructions(&self, instructions: SwapInstructions) {
        *self.instructions.lock().unwrap() = Ok(instructions);
    }

    pub fn fail_instructions(&self, error: QuoteError) {
        *self.instructions.lock().unwrap() = Err(error);
    }

    pub fn requests(&self) -> Vec<QuoteRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn instruction_calls(&self) -> usize {
        self.instruction_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteProvider for MockQuotes {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        self.requests.lock().unwrap().push(*request);

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(ScriptedQuote::Out(out)) => Ok(sample_quote(
                request.input_mint,
                request.output_mint,
                request.amount,
                out,
            )),
            Some(ScriptedQuote::Error(error)) => Err(error),
            Some(ScriptedQuote::Raw(quote)) => Ok(quote),
            None => match *self.fallback_out.lock().unwrap() {
                Some(out) => Ok(sample_quote(request.input_mint, request.output_mint, request.amount, out)),
                None => Err(QuoteError::NoRoute("COULD_NOT_FIND_ANY_ROUTE".to_string())),
            },
        }
    }

    async fn swap_instructions(
        &self,
        _quote: &Quote,
        _wallet: &Pubkey,
    ) -> Result<SwapInstructions, QuoteError> {
        self.instruction_calls.fetch_add(1, Ordering::SeqCst);
        self.instructions.lock().unwrap().clone()
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[derive(Default)]
pub struct MemoryLogSink {
    events: Mutex<Vec<LogEvent>>,
    slow_write: Mutex<Option<(String, Duration)>>,
}

impl MemoryLogSink {
    /// Запись событий с `needle` в тексте занимает `delay`
    pub fn slow_on(&self, needle: &str, delay: Duration) {
        *self.slow_write.lock().unwrap() = Some((needle.to_string(), delay));
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.level == level).count()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.message.contains(needle))
            .count()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn append(&self, event: LogEvent) -> Result<()> {
        let delay = match self.slow_write.lock().unwrap().as_ref() {
            Some((needle, delay)) if event.message.contains(needle.as_str()) => Some(*delay),
            _ => None,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    updates: Mutex<Vec<(String, RunStateUpdate)>>,
}

impl MemoryStore {
    pub fn updates(&self) -> Vec<(String, RunStateUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn updates_for(&self, agent_id: &str) -> Vec<RunStateUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == agent_id)
            .map(|(_, update)| update.clone())
            .collect()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn update_run_state(&self, agent_id: &str, update: RunStateUpdate) -> Result<()> {
        self.updates.lock().unwrap().push((agent_id.to_string(), update));
        Ok(())
    }
}
