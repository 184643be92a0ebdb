//! Tile coordinates and the URLs they map to.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use url::Url;

/// One cell of the map at a given zoom and plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
  pub map_id: i32,
  pub zoom: i32,
  pub plane: u32,
  pub x: u32,
  pub y: u32,
}

impl TileCoordinate {
  /// `{base}/{map_id}/{zoom}/{plane}_{x}_{y}.png`
  pub fn url(&self, base: &Url) -> Result<Url> {
    let raw = format!(
      "{}/{}/{}/{}_{}_{}.png",
      base.as_str().trim_end_matches('/'),
      self.map_id,
      self.zoom,
      self.plane,
      self.x,
      self.y
    );
    Url::parse(&raw).map_err(|e| eyre!("Invalid tile URL '{}': {}", raw, e))
  }
}

/// Inclusive coordinate rectangle for one zoom level.
///
/// Tile coverage is irregular; the rectangle is a conservative bound that
/// mostly exists, so some coordinates inside it may 404.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ZoomBounds {
  pub zoom: i32,
  pub max_x: u32,
  pub max_y: u32,
}

impl ZoomBounds {
  pub fn tile_count(&self) -> usize {
    (self.max_x as usize + 1) * (self.max_y as usize + 1)
  }
}

/// Every coordinate in the bounds table, zoom by zoom, x-major.
pub fn coordinates(
  map_id: i32,
  plane: u32,
  bounds: &[ZoomBounds],
) -> impl Iterator<Item = TileCoordinate> + '_ {
  bounds.iter().flat_map(move |b| {
    (0..=b.max_x).flat_map(move |x| {
      (0..=b.max_y).map(move |y| TileCoordinate {
        map_id,
        zoom: b.zoom,
        plane,
        x,
        y,
      })
    })
  })
}

/// Number of coordinates `coordinates` yields for the table.
pub fn total_tiles(bounds: &[ZoomBounds]) -> usize {
  bounds.iter().map(ZoomBounds::tile_count).sum()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base() -> Url {
    Url::parse("https://cdn.jsdelivr.net/gh/mejrs/layers_rs3@master/map_squares").unwrap()
  }

  #[test]
  fn test_tile_url_shape() {
    let tile = TileCoordinate {
      map_id: -1,
      zoom: -4,
      plane: 0,
      x: 1,
      y: 3,
    };
    assert_eq!(
      tile.url(&base()).unwrap().as_str(),
      "https://cdn.jsdelivr.net/gh/mejrs/layers_rs3@master/map_squares/-1/-4/0_1_3.png"
    );
  }

  #[test]
  fn test_trailing_slash_on_base() {
    let base = Url::parse("https://tiles.example/squares/").unwrap();
    let tile = TileCoordinate {
      map_id: 28,
      zoom: 2,
      plane: 1,
      x: 10,
      y: 20,
    };
    assert_eq!(
      tile.url(&base).unwrap().as_str(),
      "https://tiles.example/squares/28/2/1_10_20.png"
    );
  }

  #[test]
  fn test_single_zoom_rectangle() {
    let bounds = [ZoomBounds {
      zoom: -4,
      max_x: 1,
      max_y: 3,
    }];
    let urls: Vec<String> = coordinates(-1, 0, &bounds)
      .map(|c| c.url(&base()).unwrap().to_string())
      .collect();

    assert_eq!(urls.len(), 8);
    for x in 0..=1 {
      for y in 0..=3 {
        let expected = format!("{}/-1/-4/0_{}_{}.png", base(), x, y);
        assert!(urls.contains(&expected), "missing {}", expected);
      }
    }
  }

  #[test]
  fn test_total_matches_enumeration() {
    let bounds = [
      ZoomBounds {
        zoom: -4,
        max_x: 1,
        max_y: 3,
      },
      ZoomBounds {
        zoom: -3,
        max_x: 3,
        max_y: 7,
      },
    ];
    assert_eq!(total_tiles(&bounds), 40);
    assert_eq!(coordinates(-1, 0, &bounds).count(), 40);
  }
}
