// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use serde::Serialize;
use time::Date;
use time::macros::format_description;

use crate::{PatientId, PatientRecord};

pub const EMPTY_INVOICE_MESSAGE: &str =
    "Veuillez ajouter au moins une section avec des articles valides.";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InvoiceMeta {
    pub nom: String,
    pub prenom: String,
    pub police: String,
    pub assurance: String,
    pub pourcentage: String,
    pub envoye_a: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    Nom,
    Prenom,
    Police,
    Assurance,
    Pourcentage,
    EnvoyeA,
}

impl MetaField {
    pub const ALL: [Self; 6] = [
        Self::Nom,
        Self::Prenom,
        Self::Police,
        Self::Assurance,
        Self::Pourcentage,
        Self::EnvoyeA,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Nom => "Nom",
            Self::Prenom => "Prénom",
            Self::Police => "N° de police",
            Self::Assurance => "Assurance",
            Self::Pourcentage => "Pourcentage",
            Self::EnvoyeA => "Envoyé à",
        }
    }
}

impl InvoiceMeta {
    pub fn get(&self, field: MetaField) -> &str {
        match field {
            MetaField::Nom => &self.nom,
            MetaField::Prenom => &self.prenom,
            MetaField::Police => &self.police,
            MetaField::Assurance => &self.assurance,
            MetaField::Pourcentage => &self.pourcentage,
            MetaField::EnvoyeA => &self.envoye_a,
        }
    }

    fn get_mut(&mut self, field: MetaField) -> &mut String {
        match field {
            MetaField::Nom => &mut self.nom,
            MetaField::Prenom => &mut self.prenom,
            MetaField::Police => &mut self.police,
            MetaField::Assurance => &mut self.assurance,
            MetaField::Pourcentage => &mut self.pourcentage,
            MetaField::EnvoyeA => &mut self.envoye_a,
        }
    }

    fn trimmed(&self) -> Self {
        Self {
            nom: self.nom.trim().to_owned(),
            prenom: self.prenom.trim().to_owned(),
            police: self.police.trim().to_owned(),
            assurance: self.assurance.trim().to_owned(),
            pourcentage: self.pourcentage.trim().to_owned(),
            envoye_a: self.envoye_a.trim().to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticlePart {
    Libelle,
    Quantite,
    Montant,
}

impl ArticlePart {
    pub const ALL: [Self; 3] = [Self::Libelle, Self::Quantite, Self::Montant];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Libelle => "Article",
            Self::Quantite => "Quantité",
            Self::Montant => "Prix unitaire",
        }
    }
}

/// Article row as typed; amounts stay text until validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArticleDraft {
    pub libelle: String,
    pub quantite: String,
    pub montant: String,
}

impl ArticleDraft {
    fn part_mut(&mut self, part: ArticlePart) -> &mut String {
        match part {
            ArticlePart::Libelle => &mut self.libelle,
            ArticlePart::Quantite => &mut self.quantite,
            ArticlePart::Montant => &mut self.montant,
        }
    }

    pub fn part(&self, part: ArticlePart) -> &str {
        match part {
            ArticlePart::Libelle => &self.libelle,
            ArticlePart::Quantite => &self.quantite,
            ArticlePart::Montant => &self.montant,
        }
    }

    fn validated(&self) -> Option<InvoiceArticle> {
        let libelle = self.libelle.trim();
        let quantite = parse_amount(&self.quantite)?;
        let montant = parse_amount(&self.montant)?;
        (!libelle.is_empty() && quantite > 0.0 && montant >= 0.0).then(|| InvoiceArticle {
            libelle: libelle.to_owned(),
            quantite,
            montant,
        })
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDraft {
    pub titre: String,
    pub articles: Vec<ArticleDraft>,
}

impl Default for SectionDraft {
    fn default() -> Self {
        Self {
            titre: String::new(),
            articles: vec![ArticleDraft::default()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvoiceDraft {
    pub meta: InvoiceMeta,
    pub sections: Vec<SectionDraft>,
}

impl InvoiceDraft {
    /// Drops every invalid article, then every section left without a title
    /// or articles. Fails only if nothing survives.
    pub fn validate(&self) -> Result<InvoiceRequest> {
        let sections: Vec<InvoiceSection> = self
            .sections
            .iter()
            .filter_map(|section| {
                let titre = section.titre.trim();
                let articles: Vec<InvoiceArticle> = section
                    .articles
                    .iter()
                    .filter_map(ArticleDraft::validated)
                    .collect();
                (!titre.is_empty() && !articles.is_empty()).then(|| InvoiceSection {
                    titre: titre.to_owned(),
                    articles,
                })
            })
            .collect();
        if sections.is_empty() {
            bail!(EMPTY_INVOICE_MESSAGE);
        }
        Ok(InvoiceRequest {
            meta: self.meta.trimmed(),
            sections,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceArticle {
    pub libelle: String,
    pub quantite: f64,
    pub montant: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceSection {
    pub titre: String,
    pub articles: Vec<InvoiceArticle>,
}

/// Body of the invoice-generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceRequest {
    pub meta: InvoiceMeta,
    pub sections: Vec<InvoiceSection>,
}

/// Splits a full name into `(given names, surname)`: the last whitespace
/// token is the surname. Multi-token surnames ("de la Fontaine") split
/// wrongly; the user corrects them in the form.
pub fn split_full_name(full_name: &str) -> (String, String) {
    let mut tokens: Vec<&str> = full_name.split_whitespace().collect();
    match tokens.pop() {
        Some(surname) => (tokens.join(" "), surname.to_owned()),
        None => (String::new(), String::new()),
    }
}

pub fn invoice_file_name(meta: &InvoiceMeta, date: Date) -> String {
    let day = date
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default();
    format!(
        "facture_{}_{}_{day}.pdf",
        file_name_part(&meta.nom),
        file_name_part(&meta.prenom)
    )
}

fn file_name_part(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

/// One editable position in the invoice modal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceSlot {
    Meta(MetaField),
    SectionTitle {
        section: usize,
    },
    Article {
        section: usize,
        article: usize,
        part: ArticlePart,
    },
}

impl InvoiceSlot {
    pub fn section(self) -> Option<usize> {
        match self {
            Self::Meta(_) => None,
            Self::SectionTitle { section } | Self::Article { section, .. } => Some(section),
        }
    }

    pub fn accepts(self, c: char) -> bool {
        match self {
            Self::Article {
                part: ArticlePart::Quantite | ArticlePart::Montant,
                ..
            } => c.is_ascii_digit() || c == '.',
            _ => !c.is_control(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceSession {
    patient_id: PatientId,
    draft: InvoiceDraft,
    cursor: usize,
}

impl InvoiceSession {
    fn new(patient_id: PatientId, record: &PatientRecord) -> Self {
        let (prenom, nom) = split_full_name(record.full_name());
        Self {
            patient_id,
            draft: InvoiceDraft {
                meta: InvoiceMeta {
                    nom,
                    prenom,
                    ..InvoiceMeta::default()
                },
                sections: vec![SectionDraft::default()],
            },
            cursor: 0,
        }
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    pub fn draft(&self) -> &InvoiceDraft {
        &self.draft
    }

    /// Every editable slot in display order.
    pub fn slots(&self) -> Vec<InvoiceSlot> {
        let mut slots: Vec<InvoiceSlot> = MetaField::ALL.into_iter().map(InvoiceSlot::Meta).collect();
        for (section, draft) in self.draft.sections.iter().enumerate() {
            slots.push(InvoiceSlot::SectionTitle { section });
            for article in 0..draft.articles.len() {
                slots.extend(ArticlePart::ALL.into_iter().map(|part| InvoiceSlot::Article {
                    section,
                    article,
                    part,
                }));
            }
        }
        slots
    }

    pub fn focus(&self) -> InvoiceSlot {
        let slots = self.slots();
        slots
            .get(self.cursor)
            .copied()
            .unwrap_or(InvoiceSlot::Meta(MetaField::Nom))
    }

    pub fn move_focus(&mut self, delta: isize) {
        let len = self.slots().len() as isize;
        if len == 0 {
            return;
        }
        self.cursor = (self.cursor as isize + delta).rem_euclid(len) as usize;
    }

    fn focus_on(&mut self, slot: InvoiceSlot) {
        if let Some(index) = self.slots().iter().position(|candidate| *candidate == slot) {
            self.cursor = index;
        } else {
            self.cursor = self.cursor.min(self.slots().len().saturating_sub(1));
        }
    }

    pub fn value(&self, slot: InvoiceSlot) -> &str {
        match slot {
            InvoiceSlot::Meta(field) => self.draft.meta.get(field),
            InvoiceSlot::SectionTitle { section } => self
                .draft
                .sections
                .get(section)
                .map_or("", |draft| draft.titre.as_str()),
            InvoiceSlot::Article {
                section,
                article,
                part,
            } => self
                .draft
                .sections
                .get(section)
                .and_then(|draft| draft.articles.get(article))
                .map_or("", |draft| draft.part(part)),
        }
    }

    fn value_mut(&mut self, slot: InvoiceSlot) -> Option<&mut String> {
        match slot {
            InvoiceSlot::Meta(field) => Some(self.draft.meta.get_mut(field)),
            InvoiceSlot::SectionTitle { section } => self
                .draft
                .sections
                .get_mut(section)
                .map(|draft| &mut draft.titre),
            InvoiceSlot::Article {
                section,
                article,
                part,
            } => self
                .draft
                .sections
                .get_mut(section)
                .and_then(|draft| draft.articles.get_mut(article))
                .map(|draft| draft.part_mut(part)),
        }
    }

    pub fn insert_char(&mut self, c: char) -> bool {
        let slot = self.focus();
        if !slot.accepts(c) {
            return false;
        }
        match self.value_mut(slot) {
            Some(value) => {
                value.push(c);
                true
            }
            None => false,
        }
    }

    pub fn backspace(&mut self) {
        let slot = self.focus();
        if let Some(value) = self.value_mut(slot) {
            value.pop();
        }
    }

    /// Appends a blank article to the focused section (the last one when the
    /// focus is on the patient fields) and focuses it.
    pub fn add_article(&mut self) {
        let section = match self.focus().section() {
            Some(section) => section,
            None if self.draft.sections.is_empty() => {
                self.add_section();
                return;
            }
            None => self.draft.sections.len() - 1,
        };
        let Some(draft) = self.draft.sections.get_mut(section) else {
            return;
        };
        draft.articles.push(ArticleDraft::default());
        let article = draft.articles.len() - 1;
        self.focus_on(InvoiceSlot::Article {
            section,
            article,
            part: ArticlePart::Libelle,
        });
    }

    pub fn add_section(&mut self) {
        self.draft.sections.push(SectionDraft::default());
        let section = self.draft.sections.len() - 1;
        self.focus_on(InvoiceSlot::SectionTitle { section });
    }

    pub fn remove_article(&mut self) -> Result<()> {
        let InvoiceSlot::Article {
            section, article, ..
        } = self.focus()
        else {
            bail!("move to an article row to remove it");
        };
        let Some(draft) = self.draft.sections.get_mut(section) else {
            bail!("section {} no longer exists", section + 1);
        };
        if draft.articles.len() <= 1 {
            bail!("Au moins un article est requis");
        }
        draft.articles.remove(article);
        let article = article.min(draft.articles.len() - 1);
        self.focus_on(InvoiceSlot::Article {
            section,
            article,
            part: ArticlePart::Libelle,
        });
        Ok(())
    }

    pub fn remove_section(&mut self) -> Result<()> {
        let Some(section) = self.focus().section() else {
            bail!("move to a section to remove it");
        };
        if section >= self.draft.sections.len() {
            bail!("section {} no longer exists", section + 1);
        }
        self.draft.sections.remove(section);
        match section.checked_sub(1).or((!self.draft.sections.is_empty()).then_some(0)) {
            Some(section) => self.focus_on(InvoiceSlot::SectionTitle { section }),
            None => self.focus_on(InvoiceSlot::Meta(MetaField::EnvoyeA)),
        }
        Ok(())
    }

    pub fn request(&self) -> Result<InvoiceRequest> {
        self.draft.validate()
    }
}

/// `Closed -> Open(patient) -> Closed`; opening is only allowed from `Closed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InvoiceComposer {
    #[default]
    Closed,
    Open(InvoiceSession),
}

impl InvoiceComposer {
    pub fn open(&mut self, patient_id: PatientId, record: &PatientRecord) -> Result<()> {
        if let Self::Open(session) = self {
            bail!(
                "an invoice for patient {} is already open -- close it first",
                session.patient_id
            );
        }
        *self = Self::Open(InvoiceSession::new(patient_id, record));
        Ok(())
    }

    pub fn close(&mut self) {
        *self = Self::Closed;
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    pub fn session(&self) -> Option<&InvoiceSession> {
        match self {
            Self::Open(session) => Some(session),
            Self::Closed => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut InvoiceSession> {
        match self {
            Self::Open(session) => Some(session),
            Self::Closed => None,
        }
    }
}
