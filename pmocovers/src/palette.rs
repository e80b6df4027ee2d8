//! Extraction des couleurs dominantes d'une pochette
//!
//! Approche volontairement simple : l'image est réduite, les pixels sont
//! regroupés dans un histogramme RGB quantifié (5 bits par canal), puis les
//! groupes les plus peuplés sont moyennés. Les couleurs trop proches d'une
//! couleur déjà retenue sont écartées tant qu'il reste des candidats.

use anyhow::{Result, anyhow};
use image::DynamicImage;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Palette renvoyée quand l'artwork ne peut pas être analysé.
pub const FALLBACK_COLORS: [&str; 3] = ["#1a1a2e", "#e94560", "#0f3460"];

/// Nombre de couleurs extraites par défaut.
pub const DEFAULT_COLOR_COUNT: usize = 3;

/// Taille maximale (en pixels) de l'image analysée.
const SAMPLE_SIZE: u32 = 64;
/// Pixels plus transparents que ce seuil ignorés.
const MIN_ALPHA: u8 = 125;
/// Pixels quasi blancs ignorés (fonds de pochette).
const WHITE_THRESHOLD: u8 = 250;
/// Distance RGB au carré en dessous de laquelle deux couleurs sont « identiques ».
const MIN_DISTANCE_SQ: u32 = 24 * 24;

#[derive(Default, Clone, Copy)]
struct Bucket {
    count: u32,
    r: u64,
    g: u64,
    b: u64,
}

impl Bucket {
    fn average(&self) -> [u8; 3] {
        let n = self.count.max(1) as u64;
        [(self.r / n) as u8, (self.g / n) as u8, (self.b / n) as u8]
    }
}

/// Formate une couleur en `#rrggbb`.
pub fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Palette de secours sous forme de `Vec<String>`.
pub fn fallback_colors() -> Vec<String> {
    FALLBACK_COLORS.iter().map(|c| c.to_string()).collect()
}

/// Extrait jusqu'à `count` couleurs dominantes, de la plus représentée à la
/// moins représentée.
///
/// Retourne une erreur si l'image ne contient aucun pixel exploitable
/// (entièrement transparente ou blanche).
pub fn extract_palette(img: &DynamicImage, count: usize) -> Result<Vec<[u8; 3]>> {
    let sample = if img.width() > SAMPLE_SIZE || img.height() > SAMPLE_SIZE {
        img.thumbnail(SAMPLE_SIZE, SAMPLE_SIZE)
    } else {
        img.clone()
    };
    let rgba = sample.to_rgba8();

    let mut buckets: HashMap<u16, Bucket> = HashMap::new();
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a < MIN_ALPHA {
            continue;
        }
        if r > WHITE_THRESHOLD && g > WHITE_THRESHOLD && b > WHITE_THRESHOLD {
            continue;
        }
        let key = (((r >> 3) as u16) << 10) | (((g >> 3) as u16) << 5) | ((b >> 3) as u16);
        let bucket = buckets.entry(key).or_default();
        bucket.count += 1;
        bucket.r += r as u64;
        bucket.g += g as u64;
        bucket.b += b as u64;
    }

    if buckets.is_empty() {
        return Err(anyhow!("Image has no usable pixels"));
    }

    let mut ranked: Vec<(u16, Bucket)> = buckets.into_iter().collect();
    // ordre déterministe en cas d'égalité
    ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(&b.0)));

    let candidates: Vec<[u8; 3]> = ranked.iter().map(|(_, bucket)| bucket.average()).collect();

    let mut palette: Vec<[u8; 3]> = Vec::with_capacity(count);
    for color in &candidates {
        if palette.len() >= count {
            break;
        }
        if palette.iter().all(|picked| distance_sq(*picked, *color) >= MIN_DISTANCE_SQ) {
            palette.push(*color);
        }
    }

    // Pas assez de couleurs distinctes : compléter avec les suivantes
    for color in &candidates {
        if palette.len() >= count {
            break;
        }
        if !palette.contains(color) {
            palette.push(*color);
        }
    }

    Ok(palette)
}

/// Décode `bytes` et extrait la palette en `#rrggbb`.
pub fn palette_from_bytes(bytes: &[u8], count: usize) -> Result<Vec<String>> {
    let img = image::load_from_memory(bytes)?;
    Ok(extract_palette(&img, count)?.into_iter().map(to_hex).collect())
}

/// Télécharge l'artwork et calcule sa palette.
pub fn fetch_palette(url: &str, count: usize, timeout: Duration) -> Result<Vec<String>> {
    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    let bytes = client.get(url).send()?.error_for_status()?.bytes()?;
    palette_from_bytes(&bytes, count)
}

/// Complète une palette trop courte avec les couleurs de repli.
///
/// Une image peu colorée donne moins de [`DEFAULT_COLOR_COUNT`] couleurs ;
/// le résultat en a toujours au moins autant.
pub fn pad_with_fallback(mut colors: Vec<String>) -> Vec<String> {
    if colors.len() < DEFAULT_COLOR_COUNT {
        let missing = &FALLBACK_COLORS[colors.len()..DEFAULT_COLOR_COUNT];
        colors.extend(missing.iter().map(|c| c.to_string()));
    }
    colors
}

/// Palette de l'artwork `url`, ou [`FALLBACK_COLORS`] en cas d'échec.
///
/// Toujours [`DEFAULT_COLOR_COUNT`] couleurs. Appel bloquant : à exécuter
/// hors du contexte async (`tokio::task::spawn_blocking`).
pub fn colors_for_url(url: &str, timeout: Duration) -> Vec<String> {
    match fetch_palette(url, DEFAULT_COLOR_COUNT, timeout) {
        Ok(colors) => pad_with_fallback(colors),
        Err(e) => {
            debug!(url, "Color extraction failed, using fallback palette: {}", e);
            fallback_colors()
        }
    }
}

fn distance_sq(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as i32 - *y as i32;
            (d * d) as u32
        })
        .sum()
}
