//! Stake ledger: balance is banked funds, `current_bet` is funds at risk.
//! Every transfer moves value between the two (or to a killer's stake) so
//! the sum over all players never changes except on disconnect or a kill
//! without a killer.

use serde::Serialize;
use thiserror::Error;

use crate::game::player::Player;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BetError {
    #[error("amount must be a positive finite number")]
    InvalidAmount,
    #[error("a bet is already placed")]
    BetExists,
    #[error("balance is empty")]
    InsufficientBalance,
    #[error("player has cashed out")]
    Cashout,
    #[error("cash-out could not be completed")]
    CashoutFailed,
}

impl BetError {
    pub fn code(&self) -> &'static str {
        match self {
            BetError::InvalidAmount => "invalid_amount",
            BetError::BetExists => "bet_exists",
            BetError::InsufficientBalance => "insufficient_balance",
            BetError::Cashout => "cashout",
            BetError::CashoutFailed => "cashout_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetReceipt {
    pub balance: f64,
    pub current_bet: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashOutReceipt {
    pub balance: f64,
    pub total: f64,
}

pub fn receipt(player: &Player) -> BetReceipt {
    BetReceipt {
        balance: player.balance,
        current_bet: player.current_bet,
        total: player.balance + player.current_bet,
    }
}

/// Moves `min(amount, balance)` from balance into the stake.
pub fn place_bet(player: &mut Player, amount: f64) -> Result<BetReceipt, BetError> {
    if player.cashed_out {
        return Err(BetError::Cashout);
    }
    if !amount.is_finite() || amount <= 0.0 {
        return Err(BetError::InvalidAmount);
    }
    if player.current_bet > 0.0 {
        return Err(BetError::BetExists);
    }
    if player.balance <= 0.0 {
        return Err(BetError::InsufficientBalance);
    }
    let stake = amount.min(player.balance);
    player.balance -= stake;
    player.current_bet = stake;
    Ok(receipt(player))
}

/// Refunds the stake into balance and marks the player terminally cashed out.
pub fn cash_out(player: &mut Player) -> Result<CashOutReceipt, BetError> {
    if player.cashed_out {
        return Err(BetError::Cashout);
    }
    player.balance += player.current_bet;
    player.current_bet = 0.0;
    player.cashed_out = true;
    Ok(CashOutReceipt {
        balance: player.balance,
        total: player.balance,
    })
}

/// Zeroes the victim's stake and returns it as a bounty.
pub fn forfeit_stake(victim: &mut Player) -> f64 {
    std::mem::take(&mut victim.current_bet)
}

pub fn award_bounty(killer: &mut Player, bounty: f64) {
    if bounty > 0.0 {
        killer.current_bet += bounty;
    }
}
