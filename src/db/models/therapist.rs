//! Therapist directory models and queries.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use super::common::{encode_string_list, now_rfc3339, parse_string_list, Paginated, Pagination};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TherapistStatus {
    Pending,
    Active,
    Suspended,
    Inactive,
}

impl TherapistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TherapistStatus::Pending => "pending",
            TherapistStatus::Active => "active",
            TherapistStatus::Suspended => "suspended",
            TherapistStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TherapistStatus::Pending),
            "active" => Some(TherapistStatus::Active),
            "suspended" => Some(TherapistStatus::Suspended),
            "inactive" => Some(TherapistStatus::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for TherapistStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Online,
    InPerson,
    Both,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Online => "online",
            Modality::InPerson => "in_person",
            Modality::Both => "both",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Modality::Online),
            "in_person" => Some(Modality::InPerson),
            "both" => Some(Modality::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Therapist {
    pub id: String,
    pub profile_id: Option<String>,
    pub slug: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub city: Option<String>,
    pub modality: String,
    pub specialties: String,
    pub languages: String,
    pub price_per_session_cents: Option<i64>,
    pub commission_rate_cents: Option<i64>,
    pub status: String,
    pub is_verified: bool,
    pub photo_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Full therapist record for admins and the therapist themself
#[derive(Debug, Clone, Serialize)]
pub struct TherapistResponse {
    pub id: String,
    pub profile_id: Option<String>,
    pub slug: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub city: Option<String>,
    pub modality: String,
    pub specialties: Vec<String>,
    pub languages: Vec<String>,
    pub price_per_session_cents: Option<i64>,
    pub commission_rate_cents: Option<i64>,
    pub status: String,
    pub is_verified: bool,
    pub photo_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Therapist> for TherapistResponse {
    fn from(t: Therapist) -> Self {
        Self {
            specialties: parse_string_list(&t.specialties),
            languages: parse_string_list(&t.languages),
            id: t.id,
            profile_id: t.profile_id,
            slug: t.slug,
            full_name: t.full_name,
            email: t.email,
            phone: t.phone,
            bio: t.bio,
            city: t.city,
            modality: t.modality,
            price_per_session_cents: t.price_per_session_cents,
            commission_rate_cents: t.commission_rate_cents,
            status: t.status,
            is_verified: t.is_verified,
            photo_url: t.photo_url,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

/// Directory listing view; omits contact details and billing fields
#[derive(Debug, Clone, Serialize)]
pub struct PublicTherapist {
    pub id: String,
    pub slug: String,
    pub full_name: String,
    pub bio: Option<String>,
    pub city: Option<String>,
    pub modality: String,
    pub specialties: Vec<String>,
    pub languages: Vec<String>,
    pub price_per_session_cents: Option<i64>,
    pub is_verified: bool,
    pub photo_url: Option<String>,
}

impl From<Therapist> for PublicTherapist {
    fn from(t: Therapist) -> Self {
        Self {
            specialties: parse_string_list(&t.specialties),
            languages: parse_string_list(&t.languages),
            id: t.id,
            slug: t.slug,
            full_name: t.full_name,
            bio: t.bio,
            city: t.city,
            modality: t.modality,
            price_per_session_cents: t.price_per_session_cents,
            is_verified: t.is_verified,
            photo_url: t.photo_url,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateTherapistRequest {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub city: Option<String>,
    pub modality: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    pub price_per_session_cents: Option<i64>,
    pub commission_rate_cents: Option<i64>,
    pub status: Option<String>,
    pub photo_url: Option<String>,
}

/// Partial update. `None` leaves the column unchanged.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateTherapistRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub city: Option<String>,
    pub modality: Option<String>,
    pub specialties: Option<Vec<String>>,
    pub languages: Option<Vec<String>>,
    pub price_per_session_cents: Option<i64>,
    pub photo_url: Option<String>,
    /// Admin-only fields; ignored on self-service updates
    pub commission_rate_cents: Option<i64>,
    pub is_verified: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTherapistStatusRequest {
    pub status: String,
}

/// Public directory filters
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TherapistSearchQuery {
    /// Free text matched against name, bio and city
    pub q: Option<String>,
    pub city: Option<String>,
    pub modality: Option<String>,
    pub specialty: Option<String>,
    pub language: Option<String>,
    pub max_price_cents: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl TherapistSearchQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminTherapistQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Lowercase ASCII slug from a display name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        let mapped = match c {
            'á' | 'à' | 'ä' | 'â' | 'ã' | 'Á' | 'À' | 'Ä' | 'Â' | 'Ã' => Some('a'),
            'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => Some('e'),
            'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => Some('i'),
            'ó' | 'ò' | 'ö' | 'ô' | 'õ' | 'Ó' | 'Ò' | 'Ö' | 'Ô' | 'Õ' => Some('o'),
            'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => Some('u'),
            'ñ' | 'Ñ' => Some('n'),
            'ç' | 'Ç' => Some('c'),
            c if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase()),
            _ => None,
        };
        match mapped {
            Some(c) => {
                slug.push(c);
                last_dash = false;
            }
            None if !last_dash => {
                slug.push('-');
                last_dash = true;
            }
            None => {}
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "therapist".to_string()
    } else {
        slug
    }
}

fn push_search_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &TherapistSearchQuery) {
    builder.push(" WHERE status = 'active'");

    if let Some(q) = query.q.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", q);
        builder
            .push(" AND (full_name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR bio LIKE ")
            .push_bind(pattern.clone())
            .push(" OR city LIKE ")
            .push_bind(pattern)
            .push(")");
    }

    if let Some(city) = query.city.as_ref().filter(|s| !s.trim().is_empty()) {
        builder
            .push(" AND city = ")
            .push_bind(city.trim().to_string())
            .push(" COLLATE NOCASE");
    }

    match query.modality.as_deref().and_then(Modality::from_str) {
        Some(Modality::Online) => {
            builder.push(" AND modality IN ('online', 'both')");
        }
        Some(Modality::InPerson) => {
            builder.push(" AND modality IN ('in_person', 'both')");
        }
        Some(Modality::Both) => {
            builder.push(" AND modality = 'both'");
        }
        None => {}
    }

    if let Some(specialty) = query.specialty.as_ref().filter(|s| !s.trim().is_empty()) {
        builder
            .push(" AND EXISTS (SELECT 1 FROM json_each(therapists.specialties) WHERE value = ")
            .push_bind(specialty.trim().to_string())
            .push(" COLLATE NOCASE)");
    }

    if let Some(language) = query.language.as_ref().filter(|s| !s.trim().is_empty()) {
        builder
            .push(" AND EXISTS (SELECT 1 FROM json_each(therapists.languages) WHERE value = ")
            .push_bind(language.trim().to_string())
            .push(" COLLATE NOCASE)");
    }

    if let Some(max_price) = query.max_price_cents {
        builder
            .push(" AND price_per_session_cents IS NOT NULL AND price_per_session_cents <= ")
            .push_bind(max_price);
    }
}

impl Therapist {
    pub fn status_enum(&self) -> Option<TherapistStatus> {
        TherapistStatus::from_str(&self.status)
    }

    pub fn is_active(&self) -> bool {
        self.status_enum() == Some(TherapistStatus::Active)
    }

    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<Therapist>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM therapists WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_slug(
        db: &SqlitePool,
        slug: &str,
    ) -> Result<Option<Therapist>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM therapists WHERE slug = ?")
            .bind(slug)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_profile(
        db: &SqlitePool,
        profile_id: &str,
    ) -> Result<Option<Therapist>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM therapists WHERE profile_id = ?")
            .bind(profile_id)
            .fetch_optional(db)
            .await
    }

    /// Public directory search over active therapists
    pub async fn search(
        db: &SqlitePool,
        query: &TherapistSearchQuery,
    ) -> Result<Paginated<Therapist>, sqlx::Error> {
        let pagination = query.pagination();

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM therapists");
        push_search_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(db).await?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM therapists");
        push_search_filters(&mut select, query);
        select
            .push(" ORDER BY is_verified DESC, full_name ASC LIMIT ")
            .push_bind(pagination.per_page())
            .push(" OFFSET ")
            .push_bind(pagination.offset());
        let items = select.build_query_as::<Therapist>().fetch_all(db).await?;

        Ok(Paginated::new(items, total, &pagination))
    }

    /// Admin listing with optional status filter
    pub async fn list(
        db: &SqlitePool,
        status: Option<TherapistStatus>,
        pagination: &Pagination,
    ) -> Result<Paginated<Therapist>, sqlx::Error> {
        let status = status.map(|s| s.as_str());
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM therapists WHERE (? IS NULL OR status = ?)")
                .bind(status)
                .bind(status)
                .fetch_one(db)
                .await?;

        let items = sqlx::query_as(
            r#"
            SELECT * FROM therapists
            WHERE (? IS NULL OR status = ?)
            ORDER BY created_at DESC, full_name ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(status)
        .bind(status)
        .bind(pagination.per_page())
        .bind(pagination.offset())
        .fetch_all(db)
        .await?;

        Ok(Paginated::new(items, total, pagination))
    }

    /// Therapists that accrue commission (active or suspended for non-payment)
    pub async fn list_billable(db: &SqlitePool) -> Result<Vec<Therapist>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM therapists WHERE status IN ('active', 'suspended') ORDER BY created_at",
        )
        .fetch_all(db)
        .await
    }

    /// Pick a slug derived from `name` that is not taken yet
    pub async fn unique_slug<'e, E>(executor: E, name: &str) -> Result<String, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let base = slugify(name);
        let taken: Vec<String> =
            sqlx::query_scalar("SELECT slug FROM therapists WHERE slug = ? OR slug LIKE ?")
                .bind(&base)
                .bind(format!("{}-%", base))
                .fetch_all(executor)
                .await?;

        if !taken.contains(&base) {
            return Ok(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    pub async fn insert(
        conn: &mut sqlx::SqliteConnection,
        req: &CreateTherapistRequest,
        profile_id: Option<&str>,
    ) -> Result<Therapist, sqlx::Error> {
        let slug = Self::unique_slug(&mut *conn, &req.full_name).await?;
        let now = now_rfc3339();
        sqlx::query_as(
            r#"
            INSERT INTO therapists (
                id, profile_id, slug, full_name, email, phone, bio, city, modality,
                specialties, languages, price_per_session_cents, commission_rate_cents,
                status, is_verified, photo_url, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(profile_id)
        .bind(&slug)
        .bind(req.full_name.trim())
        .bind(req.email.trim().to_lowercase())
        .bind(&req.phone)
        .bind(&req.bio)
        .bind(&req.city)
        .bind(req.modality.as_deref().unwrap_or("online"))
        .bind(encode_string_list(&req.specialties))
        .bind(encode_string_list(&req.languages))
        .bind(req.price_per_session_cents)
        .bind(req.commission_rate_cents)
        .bind(req.status.as_deref().unwrap_or("pending"))
        .bind(&req.photo_url)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *conn)
        .await
    }

    /// Apply a partial update. `allow_admin_fields` gates commission and verification.
    pub async fn update(
        db: &SqlitePool,
        id: &str,
        req: &UpdateTherapistRequest,
        allow_admin_fields: bool,
    ) -> Result<Therapist, sqlx::Error> {
        let (commission, verified) = if allow_admin_fields {
            (req.commission_rate_cents, req.is_verified)
        } else {
            (None, None)
        };

        sqlx::query_as(
            r#"
            UPDATE therapists SET
                full_name = COALESCE(?, full_name),
                email = COALESCE(?, email),
                phone = COALESCE(?, phone),
                bio = COALESCE(?, bio),
                city = COALESCE(?, city),
                modality = COALESCE(?, modality),
                specialties = COALESCE(?, specialties),
                languages = COALESCE(?, languages),
                price_per_session_cents = COALESCE(?, price_per_session_cents),
                photo_url = COALESCE(?, photo_url),
                commission_rate_cents = COALESCE(?, commission_rate_cents),
                is_verified = COALESCE(?, is_verified),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(req.full_name.as_deref().map(str::trim))
        .bind(req.email.as_ref().map(|e| e.trim().to_lowercase()))
        .bind(&req.phone)
        .bind(&req.bio)
        .bind(&req.city)
        .bind(&req.modality)
        .bind(req.specialties.as_deref().map(encode_string_list))
        .bind(req.languages.as_deref().map(encode_string_list))
        .bind(req.price_per_session_cents)
        .bind(&req.photo_url)
        .bind(commission)
        .bind(verified)
        .bind(now_rfc3339())
        .bind(id)
        .fetch_one(db)
        .await
    }

    pub async fn set_status<'e, E>(
        executor: E,
        id: &str,
        status: TherapistStatus,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("UPDATE therapists SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_rfc3339())
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM therapists WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
pub(crate) async fn insert_test_therapist(
    db: &SqlitePool,
    full_name: &str,
    status: TherapistStatus,
) -> Therapist {
    let mut conn = db.acquire().await.unwrap();
    let req = CreateTherapistRequest {
        full_name: full_name.to_string(),
        email: format!("{}@example.com", slugify(full_name)),
        status: Some(status.as_str().to_string()),
        ..Default::default()
    };
    Therapist::insert(&mut conn, &req, None).await.unwrap()
}
