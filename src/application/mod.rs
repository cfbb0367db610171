pub mod adversarial_screen;
pub mod architect;
pub mod behavioral_adversary;
pub mod evolution_memory;
pub mod evolutionary_mutator;
pub mod guardrails;
pub mod ledger;
pub mod narrative_pulse;
pub mod oracle;
pub mod reasoning_loop;
pub mod reconciliation_auditor;
pub mod sentiment_producer;
pub mod shadow_engine;
pub mod supervisor;
