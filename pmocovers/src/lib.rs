//! # pmocovers - Données dérivées des couvertures d'albums
//!
//! Cette crate calcule et mémorise les informations tirées d'une pochette :
//!
//! - [`palette`] : extraction des couleurs dominantes (`#rrggbb`) à partir
//!   des octets d'une image ou d'une URL d'artwork
//! - [`color_cache`] : cache LRU borné des palettes, indexé par URL
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmocovers::{ColorCache, colors_for_url};
//! use std::time::Duration;
//!
//! let mut cache = ColorCache::new(100);
//! let url = "https://i.scdn.co/image/ab67616d0000b273".to_string();
//!
//! let colors = match cache.get(&url) {
//!     Some(colors) => colors,
//!     None => {
//!         let colors = colors_for_url(&url, Duration::from_secs(5));
//!         cache.put(url.clone(), colors.clone());
//!         colors
//!     }
//! };
//! println!("{colors:?}");
//! ```

pub mod color_cache;
pub mod palette;

pub use color_cache::{ColorCache, DEFAULT_COLOR_CACHE_SIZE, LruCache};
pub use palette::{
    DEFAULT_COLOR_COUNT, FALLBACK_COLORS, colors_for_url, extract_palette, fallback_colors,
    pad_with_fallback, palette_from_bytes,
};
