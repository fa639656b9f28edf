//! Metric declarations and the fixed-shape [`Stats`] record.
//!
//! Every metric is declared once in [`DECLARATIONS`] with its aggregation kind
//! and the member attribute it reads. The aggregation engine consults that
//! table; no call site chooses between a mean and a sum on its own.

use serde::{Deserialize, Serialize};

use crate::record::Member;

use self::{
  Aggregation::{Mean, Sum},
  Attribute::{Achievement, Field},
};

// ─── Declarations ────────────────────────────────────────────────────────────

/// How a metric folds a roster into one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
  /// Arithmetic mean over the members that have the attribute.
  Mean,
  /// Sum over the members that have the attribute.
  Sum,
}

/// Where a metric's per-member value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
  /// A top-level numeric field of the member record.
  Field(&'static str),
  /// The `value` of a named entry in the member's `achievements` list.
  Achievement(&'static str),
}

impl Attribute {
  /// The member's value for this attribute; `None` when absent or
  /// non-numeric.
  pub fn read(self, member: &Member) -> Option<f64> {
    match self {
      Self::Field(name) => member.numeric(name),
      Self::Achievement(name) => member.achievement(name),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
  AvgDonations,
  AvgDonationsReceived,
  AvgGoldGrab,
  AvgElixirGrab,
  AvgDeGrab,
  AvgWarStars,
  AvgAttackWins,
  AvgVersusWins,
  TotalTrophies,
  TotalBhTrophies,
  TotalGoldGrab,
  TotalElixirGrab,
  TotalDeGrab,
  TotalDonations,
  TotalAttackWins,
  TotalVersusWins,
}

/// One row of the declaration table.
#[derive(Debug, Clone, Copy)]
pub struct MetricDecl {
  pub metric:      Metric,
  pub aggregation: Aggregation,
  pub attribute:   Attribute,
}

const fn decl(metric: Metric, aggregation: Aggregation, attribute: Attribute) -> MetricDecl {
  MetricDecl { metric, aggregation, attribute }
}

/// The metric declaration table, in [`Stats`] field order.
pub const DECLARATIONS: [MetricDecl; 16] = [
  decl(Metric::AvgDonations, Mean, Field("donations")),
  decl(Metric::AvgDonationsReceived, Mean, Field("donationsReceived")),
  decl(Metric::AvgGoldGrab, Mean, Achievement("Gold Grab")),
  decl(Metric::AvgElixirGrab, Mean, Achievement("Elixir Escapade")),
  decl(Metric::AvgDeGrab, Mean, Achievement("Heroic Heist")),
  decl(Metric::AvgWarStars, Mean, Field("warStars")),
  decl(Metric::AvgAttackWins, Mean, Field("attackWins")),
  decl(Metric::AvgVersusWins, Mean, Field("versusBattleWins")),
  decl(Metric::TotalTrophies, Sum, Field("trophies")),
  decl(Metric::TotalBhTrophies, Sum, Field("versusTrophies")),
  decl(Metric::TotalGoldGrab, Sum, Achievement("Gold Grab")),
  decl(Metric::TotalElixirGrab, Sum, Achievement("Elixir Escapade")),
  decl(Metric::TotalDeGrab, Sum, Achievement("Heroic Heist")),
  decl(Metric::TotalDonations, Sum, Field("donations")),
  decl(Metric::TotalAttackWins, Sum, Field("attackWins")),
  decl(Metric::TotalVersusWins, Sum, Field("versusBattleWins")),
];

impl Metric {
  pub const ALL: [Metric; 16] = [
    Metric::AvgDonations,
    Metric::AvgDonationsReceived,
    Metric::AvgGoldGrab,
    Metric::AvgElixirGrab,
    Metric::AvgDeGrab,
    Metric::AvgWarStars,
    Metric::AvgAttackWins,
    Metric::AvgVersusWins,
    Metric::TotalTrophies,
    Metric::TotalBhTrophies,
    Metric::TotalGoldGrab,
    Metric::TotalElixirGrab,
    Metric::TotalDeGrab,
    Metric::TotalDonations,
    Metric::TotalAttackWins,
    Metric::TotalVersusWins,
  ];

  pub fn decl(self) -> &'static MetricDecl {
    // DECLARATIONS is laid out in variant order.
    &DECLARATIONS[self as usize]
  }

  /// Field name used in persisted and serialised records.
  pub fn name(self) -> &'static str {
    match self {
      Self::AvgDonations => "avg_donations",
      Self::AvgDonationsReceived => "avg_donations_received",
      Self::AvgGoldGrab => "avg_gold_grab",
      Self::AvgElixirGrab => "avg_elixir_grab",
      Self::AvgDeGrab => "avg_de_grab",
      Self::AvgWarStars => "avg_war_stars",
      Self::AvgAttackWins => "avg_attack_wins",
      Self::AvgVersusWins => "avg_versus_wins",
      Self::TotalTrophies => "total_trophies",
      Self::TotalBhTrophies => "total_bh_trophies",
      Self::TotalGoldGrab => "total_gold_grab",
      Self::TotalElixirGrab => "total_elixir_grab",
      Self::TotalDeGrab => "total_de_grab",
      Self::TotalDonations => "total_donations",
      Self::TotalAttackWins => "total_attack_wins",
      Self::TotalVersusWins => "total_versus_wins",
    }
  }
}

/// Replace a non-finite value with zero. Every value stored in [`Stats`]
/// passes through here.
pub fn finite_or_zero(value: f64) -> f64 {
  if value.is_finite() { value } else { 0.0 }
}

// ─── Stats ───────────────────────────────────────────────────────────────────

/// One finite number per metric.
///
/// This is the shape of both a point-in-time summary and a delta record. The
/// all-zero value is the summary of an empty roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
  pub avg_donations:          f64,
  pub avg_donations_received: f64,
  pub avg_gold_grab:          f64,
  pub avg_elixir_grab:        f64,
  pub avg_de_grab:            f64,
  pub avg_war_stars:          f64,
  pub avg_attack_wins:        f64,
  pub avg_versus_wins:        f64,
  pub total_trophies:         f64,
  pub total_bh_trophies:      f64,
  pub total_gold_grab:        f64,
  pub total_elixir_grab:      f64,
  pub total_de_grab:          f64,
  pub total_donations:        f64,
  pub total_attack_wins:      f64,
  pub total_versus_wins:      f64,
}

impl Stats {
  pub fn zero() -> Self { Self::default() }

  /// Build a record by evaluating `f` for every metric. Non-finite results
  /// are stored as zero.
  pub fn from_fn(mut f: impl FnMut(Metric) -> f64) -> Self {
    let mut stats = Self::zero();
    for metric in Metric::ALL {
      *stats.get_mut(metric) = finite_or_zero(f(metric));
    }
    stats
  }

  pub fn get(&self, metric: Metric) -> f64 {
    match metric {
      Metric::AvgDonations => self.avg_donations,
      Metric::AvgDonationsReceived => self.avg_donations_received,
      Metric::AvgGoldGrab => self.avg_gold_grab,
      Metric::AvgElixirGrab => self.avg_elixir_grab,
      Metric::AvgDeGrab => self.avg_de_grab,
      Metric::AvgWarStars => self.avg_war_stars,
      Metric::AvgAttackWins => self.avg_attack_wins,
      Metric::AvgVersusWins => self.avg_versus_wins,
      Metric::TotalTrophies => self.total_trophies,
      Metric::TotalBhTrophies => self.total_bh_trophies,
      Metric::TotalGoldGrab => self.total_gold_grab,
      Metric::TotalElixirGrab => self.total_elixir_grab,
      Metric::TotalDeGrab => self.total_de_grab,
      Metric::TotalDonations => self.total_donations,
      Metric::TotalAttackWins => self.total_attack_wins,
      Metric::TotalVersusWins => self.total_versus_wins,
    }
  }

  fn get_mut(&mut self, metric: Metric) -> &mut f64 {
    match metric {
      Metric::AvgDonations => &mut self.avg_donations,
      Metric::AvgDonationsReceived => &mut self.avg_donations_received,
      Metric::AvgGoldGrab => &mut self.avg_gold_grab,
      Metric::AvgElixirGrab => &mut self.avg_elixir_grab,
      Metric::AvgDeGrab => &mut self.avg_de_grab,
      Metric::AvgWarStars => &mut self.avg_war_stars,
      Metric::AvgAttackWins => &mut self.avg_attack_wins,
      Metric::AvgVersusWins => &mut self.avg_versus_wins,
      Metric::TotalTrophies => &mut self.total_trophies,
      Metric::TotalBhTrophies => &mut self.total_bh_trophies,
      Metric::TotalGoldGrab => &mut self.total_gold_grab,
      Metric::TotalElixirGrab => &mut self.total_elixir_grab,
      Metric::TotalDeGrab => &mut self.total_de_grab,
      Metric::TotalDonations => &mut self.total_donations,
      Metric::TotalAttackWins => &mut self.total_attack_wins,
      Metric::TotalVersusWins => &mut self.total_versus_wins,
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
    Metric::ALL.into_iter().map(|m| (m, self.get(m)))
  }

  pub fn is_zero(&self) -> bool { self.iter().all(|(_, v)| v == 0.0) }
}
