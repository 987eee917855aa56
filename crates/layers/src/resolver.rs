use expression::{
    ConditionalExpression, Defines, Expression, ExpressionError, References, Value, expand_defines,
};
use foundation::{Feature, TimeInterval};
use runtime::{DiagnosticKind, Diagnostics};
use serde_json::Map;

use crate::appearance::{ConditionsSpec, StyleExpression, StyleValue};
use crate::cache::{EvaluationCache, EvaluationStats, cache_key};
use crate::computed::{ComputedFeature, ResolvedAppearance};
use crate::layer::SimpleLayer;
use crate::prepare::{parse_json_properties, time_intervals};

/// Turns a layer's appearance declarations into concrete values per feature.
///
/// Evaluation failures never escape: the property resolves to undefined (and
/// is left out) and the error goes to the diagnostics sink.
#[derive(Debug)]
pub struct AppearanceResolver {
    cache: EvaluationCache,
    diagnostics: Diagnostics,
}

impl AppearanceResolver {
    pub fn new(cache_capacity: usize, diagnostics: Diagnostics) -> Self {
        Self {
            cache: EvaluationCache::new(cache_capacity),
            diagnostics,
        }
    }

    pub fn cache_stats(&self) -> EvaluationStats {
        self.cache.stats()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn resolve_feature(&mut self, layer: &SimpleLayer, feature: &Feature) -> ResolvedAppearance {
        let mut resolved = ResolvedAppearance::new();
        for (kind, spec) in layer.appearance.iter() {
            let mut values = Map::new();
            for (property, style) in spec {
                match self.evaluate_style(style, feature, layer.defines.as_ref()) {
                    Ok(value) => {
                        if let Some(json) = value.to_json() {
                            values.insert(property.clone(), json);
                        }
                    }
                    Err(err) => {
                        let kind_of_error = match err {
                            ExpressionError::Parse(_) => DiagnosticKind::Parse,
                            ExpressionError::Eval(_) => DiagnosticKind::Eval,
                        };
                        self.diagnostics.report(
                            kind_of_error,
                            Some(&layer.id),
                            format!("{kind}.{property} on feature {}: {err}", feature.id),
                        );
                    }
                }
            }
            resolved.insert(kind, values);
        }
        resolved
    }

    /// Layer-level appearance, evaluated against the layer's own properties.
    pub fn resolve_layer(&mut self, layer: &SimpleLayer) -> Option<ResolvedAppearance> {
        if layer.appearance.is_empty() {
            return None;
        }
        let pseudo = Feature::new(layer.id.clone())
            .with_properties(layer.properties.clone().unwrap_or_default());
        Some(self.resolve_feature(layer, &pseudo))
    }

    /// Prepares `feature` for evaluation and resolves it.
    pub fn compute_feature(
        &mut self,
        layer: &SimpleLayer,
        feature: &Feature,
        interval: Option<TimeInterval>,
    ) -> ComputedFeature {
        let json_properties = layer
            .data
            .as_ref()
            .map(|data| data.json_properties.as_slice())
            .unwrap_or_default();
        let prepared = parse_json_properties(feature, json_properties);
        let appearance = self.resolve_feature(layer, &prepared);
        ComputedFeature {
            feature: prepared.into_owned(),
            appearance,
            interval,
        }
    }

    /// Resolves a whole batch in order on the calling thread.
    pub fn compute_features(&mut self, layer: &SimpleLayer, features: &[Feature]) -> Vec<ComputedFeature> {
        let time = layer.data.as_ref().and_then(|data| data.time.as_ref());
        let intervals = time_intervals(features, time);
        features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                let interval = intervals.as_ref().and_then(|all| all[index]);
                self.compute_feature(layer, feature, interval)
            })
            .collect()
    }

    pub fn evaluate_style(
        &mut self,
        style: &StyleValue,
        feature: &Feature,
        defines: Option<&Defines>,
    ) -> Result<Value, ExpressionError> {
        match style {
            StyleValue::Literal(json) => Ok(Value::from(json)),
            StyleValue::Expression(container) => match &container.expression {
                StyleExpression::Literal(json) => Ok(Value::from(json)),
                StyleExpression::Text(text) => self.evaluate_text(text, feature, defines),
                StyleExpression::Conditions(spec) => {
                    self.evaluate_conditions(spec, feature, defines)
                }
            },
        }
    }

    fn evaluate_text(
        &mut self,
        text: &str,
        feature: &Feature,
        defines: Option<&Defines>,
    ) -> Result<Value, ExpressionError> {
        let expanded = expand_defines(text, defines);
        let parsed = self.cache.parsed(&expanded)?;
        let key = cache_key(&expanded, &parsed.references, feature, defines);
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }
        let expression = Expression::from_syntax(&*expanded, &parsed.syntax, Some(feature))?;
        let value = expression.evaluate(feature)?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }

    fn evaluate_conditions(
        &mut self,
        spec: &ConditionsSpec,
        feature: &Feature,
        defines: Option<&Defines>,
    ) -> Result<Value, ExpressionError> {
        let mut refs = References::default();
        let mut branches = Vec::with_capacity(spec.conditions.len());
        for (condition, result) in &spec.conditions {
            let condition = self.branch(condition, feature, defines, &mut refs)?;
            let result = self.branch(result, feature, defines, &mut refs)?;
            branches.push((condition, result));
        }

        let identity = serde_json::json!({
            "conditions": branches
                .iter()
                .map(|(c, r)| [c.source(), r.source()])
                .collect::<Vec<_>>()
        })
        .to_string();
        let key = cache_key(&identity, &refs, feature, defines);
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }
        let value = ConditionalExpression::from_pairs(branches).evaluate(feature)?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }

    fn branch(
        &mut self,
        text: &str,
        feature: &Feature,
        defines: Option<&Defines>,
        refs: &mut References,
    ) -> Result<Expression, ExpressionError> {
        let expanded = expand_defines(text, defines);
        let parsed = self.cache.parsed(&expanded)?;
        refs.names.extend(parsed.references.names.iter().cloned());
        refs.whole_feature |= parsed.references.whole_feature;
        Ok(Expression::from_syntax(&*expanded, &parsed.syntax, Some(feature))?)
    }
}
