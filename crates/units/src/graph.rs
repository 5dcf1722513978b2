//! Conversion factor resolution over the unit graph.
//!
//! Two layers: a tenant-wide default closure built from unscoped rules, and a
//! per-product closure seeded with the product's rules plus the implicit
//! stocking-unit self-loop, chained onto the default closure at every unit the
//! product layer reaches. All closures are shortest-path (fewest hops) with a
//! deterministic tie-break: ties go to the first path discovered under sorted
//! adjacency order.

use std::collections::VecDeque;
use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;

use larder_core::{DomainError, DomainResult, ProductId, UnitId};

use crate::rule::ConversionRule;

/// Round-trip deviation beyond this is a configuration cycle. Small drift from
/// hand-entered inverse factors (e.g. 12 and 0.083333) stays below it.
const CYCLE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3); // 0.001

/// A resolved conversion path: accumulated factor and hop count.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Path {
    factor: Decimal,
    hops: u32,
}

type Adjacency = BTreeMap<UnitId, Vec<(UnitId, Decimal)>>;
type Closure = BTreeMap<(UnitId, UnitId), Path>;

/// Deterministic conversion resolver for one tenant's rule set.
///
/// Built once from configuration; resolution is a pure function of the rules.
#[derive(Debug, Clone)]
pub struct ConversionGraph {
    default_closure: Closure,
    product_rules: HashMap<ProductId, Vec<ConversionRule>>,
}

impl ConversionGraph {
    /// Build a graph from a full rule set, validating it as configuration.
    ///
    /// Fails with `Validation` on non-positive factors or duplicate edges and
    /// with `CycleDetected` when any path returns to its start unit with an
    /// accumulated factor that is not 1.
    pub fn build(rules: Vec<ConversionRule>) -> DomainResult<Self> {
        let mut default_rules = Vec::new();
        let mut product_rules: HashMap<ProductId, Vec<ConversionRule>> = HashMap::new();

        for rule in rules {
            if rule.factor <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "conversion factor must be positive, got {}",
                    rule.factor
                )));
            }
            if rule.from_unit == rule.to_unit && rule.factor != Decimal::ONE {
                return Err(DomainError::cycle(format!(
                    "self-conversion for unit {} with factor {}",
                    rule.from_unit, rule.factor
                )));
            }
            match rule.product_id {
                None => default_rules.push(rule),
                Some(product) => product_rules.entry(product).or_default().push(rule),
            }
        }

        let default_adjacency = build_adjacency(&default_rules)?;
        let default_closure = close(&default_adjacency)?;

        // Validate each product layer on its own rules as well, so a broken
        // scoped rule set is reported at configuration time, not first use.
        for rules in product_rules.values_mut() {
            rules.sort_by_key(|r| (r.from_unit, r.to_unit));
            let adjacency = build_adjacency(rules)?;
            close(&adjacency)?;
        }

        Ok(Self {
            default_closure,
            product_rules,
        })
    }

    /// Resolve the factor converting `from` into `to` for the given product.
    ///
    /// The product layer (scoped rules + implicit stocking-unit self-loop)
    /// takes precedence; paths may chain from it onto the default closure.
    /// Fails with `NoConversionPath` when the two units cannot be related.
    pub fn resolve(
        &self,
        product_id: ProductId,
        stocking_unit: UnitId,
        from: UnitId,
        to: UnitId,
    ) -> DomainResult<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }

        let product_closure = self.product_closure(product_id, stocking_unit)?;
        let chained = self.chain_onto_defaults(&product_closure);

        if let Some(path) = chained.get(&(from, to)) {
            return Ok(path.factor);
        }
        if let Some(path) = self.default_closure.get(&(from, to)) {
            return Ok(path.factor);
        }

        Err(DomainError::NoConversionPath { from, to })
    }

    /// Advisory resolution: falls back to a factor of 1 when no path exists.
    ///
    /// Only for display-side aggregation (missing stock, current price);
    /// ledger mutations must use [`ConversionGraph::resolve`].
    pub fn resolve_or_one(
        &self,
        product_id: ProductId,
        stocking_unit: UnitId,
        from: UnitId,
        to: UnitId,
    ) -> Decimal {
        match self.resolve(product_id, stocking_unit, from, to) {
            Ok(factor) => factor,
            Err(_) => Decimal::ONE,
        }
    }

    fn product_closure(&self, product_id: ProductId, stocking_unit: UnitId) -> DomainResult<Closure> {
        let mut rules: Vec<ConversionRule> = self
            .product_rules
            .get(&product_id)
            .cloned()
            .unwrap_or_default();
        rules.push(ConversionRule::product_rule(
            product_id,
            stocking_unit,
            stocking_unit,
            Decimal::ONE,
        ));
        let adjacency = build_adjacency(&rules)?;
        close(&adjacency)
    }

    /// Extend the product closure by chaining onto the default closure at any
    /// unit the product layer reaches. Shorter combined paths win; existing
    /// (shallower) entries are never overwritten.
    fn chain_onto_defaults(&self, product_closure: &Closure) -> Closure {
        let mut chained = product_closure.clone();

        for (&(a, b), p1) in product_closure {
            for (&(b2, c), p2) in &self.default_closure {
                if b2 != b || a == c {
                    continue;
                }
                let candidate = Path {
                    factor: p1.factor * p2.factor,
                    hops: p1.hops + p2.hops,
                };
                match chained.get(&(a, c)) {
                    Some(existing) if existing.hops <= candidate.hops => {}
                    _ => {
                        chained.insert((a, c), candidate);
                    }
                }
            }
        }

        chained
    }
}

fn build_adjacency(rules: &[ConversionRule]) -> DomainResult<Adjacency> {
    let mut adjacency: Adjacency = BTreeMap::new();
    let mut seen: Vec<(UnitId, UnitId)> = Vec::new();

    let mut sorted: Vec<&ConversionRule> = rules.iter().collect();
    sorted.sort_by_key(|r| (r.from_unit, r.to_unit));

    for rule in sorted {
        let edge = (rule.from_unit, rule.to_unit);
        if rule.from_unit == rule.to_unit {
            // Identity edges carry no information for the closure.
            continue;
        }
        if seen.contains(&edge) {
            return Err(DomainError::validation(format!(
                "duplicate conversion rule for {} -> {}",
                rule.from_unit, rule.to_unit
            )));
        }
        seen.push(edge);
        adjacency
            .entry(rule.from_unit)
            .or_default()
            .push((rule.to_unit, rule.factor));
    }

    Ok(adjacency)
}

/// Shortest-path closure by BFS over multiplicative edges.
///
/// First visit wins (smallest hop count; hop ties broken by sorted discovery
/// order). An edge closing back onto the start unit is checked for factor
/// consistency instead of being followed; any other already-visited target is
/// discarded.
fn close(adjacency: &Adjacency) -> DomainResult<Closure> {
    let mut closure: Closure = BTreeMap::new();
    let mut units: Vec<UnitId> = adjacency.keys().copied().collect();
    for targets in adjacency.values() {
        units.extend(targets.iter().map(|(to, _)| *to));
    }
    units.sort();
    units.dedup();

    // Identity pairs keep (u, u) resolving to exactly 1 regardless of any
    // longer path that happens to loop back.
    for &unit in &units {
        closure.insert((unit, unit), Path { factor: Decimal::ONE, hops: 0 });
    }

    for &start in &units {
        let mut visited: BTreeMap<UnitId, Path> = BTreeMap::new();
        visited.insert(start, Path { factor: Decimal::ONE, hops: 0 });
        let mut queue: VecDeque<UnitId> = VecDeque::new();
        queue.push_back(start);

        while let Some(unit) = queue.pop_front() {
            let here = visited[&unit];
            let Some(edges) = adjacency.get(&unit) else {
                continue;
            };
            for &(next, factor) in edges {
                let accumulated = here.factor * factor;
                if next == start {
                    let deviation = (accumulated - Decimal::ONE).abs();
                    if deviation > CYCLE_TOLERANCE {
                        return Err(DomainError::cycle(format!(
                            "path from {start} returns with factor {accumulated}"
                        )));
                    }
                    continue;
                }
                if visited.contains_key(&next) {
                    // A longer (or equal) path to an already-reached unit.
                    continue;
                }
                let path = Path {
                    factor: accumulated,
                    hops: here.hops + 1,
                };
                visited.insert(next, path);
                closure.insert((start, next), path);
                queue.push_back(next);
            }
        }
    }

    Ok(closure)
}
