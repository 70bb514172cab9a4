// src/extract/selector.rs

//! Configurable CSS selector extractor.
//!
//! Covers the common portal layouts: a table (or card list) of rows, with
//! each field read from a cell's text or an attribute.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::extract::Extractor;
use crate::models::{CandidateRecord, CleaningConfig, ExtractSpec, FieldSpec, SourceDescriptor};
use crate::utils::resolve_url;

struct CompiledField {
    name: String,
    selector: Option<Selector>,
    index: i32,
    attr: Option<String>,
    link: bool,
    pattern: Option<Regex>,
}

/// Extractor driven by an `ExtractSpec`.
pub struct SelectorExtractor {
    container: Option<(String, Selector)>,
    row: Selector,
    skip_rows: usize,
    fields: Vec<CompiledField>,
    cleaning: CleaningConfig,
}

impl SelectorExtractor {
    /// Compile selectors and patterns up front so bad rules fail at startup.
    pub fn new(spec: &ExtractSpec, cleaning: CleaningConfig) -> Result<Self> {
        let container = spec
            .container
            .as_ref()
            .map(|s| Self::parse_selector(s).map(|sel| (s.clone(), sel)))
            .transpose()?;

        let fields = spec
            .fields
            .iter()
            .map(Self::compile_field)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            container,
            row: Self::parse_selector(&spec.row)?,
            skip_rows: spec.skip_rows,
            fields,
            cleaning,
        })
    }

    fn compile_field(field: &FieldSpec) -> Result<CompiledField> {
        Ok(CompiledField {
            name: field.name.clone(),
            selector: field
                .selector
                .as_ref()
                .map(|s| Self::parse_selector(s))
                .transpose()?,
            index: field.index,
            attr: field.attr.clone(),
            link: field.link,
            pattern: field.pattern.as_deref().map(Regex::new).transpose()?,
        })
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }

    fn pick<'a>(elements: &[ElementRef<'a>], index: i32) -> Option<ElementRef<'a>> {
        let len = elements.len() as i64;
        let i = if index < 0 {
            len + index as i64
        } else {
            index as i64
        };
        if i < 0 {
            return None;
        }
        elements.get(i as usize).copied()
    }

    fn read_field(&self, row: ElementRef<'_>, field: &CompiledField, base: &Url) -> Option<String> {
        let elements: Vec<ElementRef<'_>> = match &field.selector {
            Some(sel) => row.select(sel).collect(),
            None => vec![row],
        };
        let element = Self::pick(&elements, field.index)?;

        let mut value = match &field.attr {
            Some(attr) => element.value().attr(attr)?.trim().to_string(),
            None => self.cleaning.clean(&element.text().collect::<String>()),
        };

        if field.link && !value.is_empty() {
            value = resolve_url(base, &value);
        }

        if let Some(re) = &field.pattern {
            let caps = re.captures(&value)?;
            value = caps.get(1).or_else(|| caps.get(0))?.as_str().to_string();
        }

        (!value.is_empty()).then_some(value)
    }

    fn parse_row(&self, row: ElementRef<'_>, base: &Url) -> CandidateRecord {
        let mut record = CandidateRecord::new();
        for field in &self.fields {
            if let Some(value) = self.read_field(row, field, base) {
                record.insert(field.name.clone(), value);
            }
        }
        record
    }
}

impl Extractor for SelectorExtractor {
    fn extract(&self, source: &SourceDescriptor, raw: &str) -> Result<Vec<CandidateRecord>> {
        let document = Html::parse_document(raw);
        let base = Url::parse(&source.url)?;

        let scopes: Vec<ElementRef<'_>> = match &self.container {
            Some((name, sel)) => {
                let found: Vec<_> = document.select(sel).collect();
                if found.is_empty() {
                    return Err(AppError::extraction(
                        &source.id,
                        format!("expected container '{name}' not found"),
                    ));
                }
                found
            }
            None => vec![document.root_element()],
        };

        let records = scopes
            .iter()
            .flat_map(|scope| scope.select(&self.row))
            .skip(self.skip_rows)
            .map(|row| self.parse_row(row, &base))
            .filter(|record| !record.is_empty())
            .collect();

        Ok(records)
    }
}
