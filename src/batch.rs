use anyhow::{bail, Result};
use std::mem::size_of;

use crate::spawn::SpawnController;
use crate::sprite::{Bounds, PhysicsStep, Sprite, SpriteInstance, TextureRegion};

// Sprites added per spawn event
pub const DEFAULT_BATCH_SIZE: usize = 5000;

// Destination of a batch's per-instance records (a mapped GPU buffer at runtime).
pub trait InstanceStorage {
    fn write_instances(&mut self, instances: &[SpriteInstance]) -> Result<()>;
}

pub trait InstanceAllocator {
    type Storage: InstanceStorage;

    fn allocate_instances(&self, count: usize) -> Result<Self::Storage>;
}

pub fn instance_bytes(count: usize) -> u64 {
    (count * size_of::<SpriteInstance>()) as u64
}

// Fixed-size group of sprites sharing one texture region and one instance buffer.
pub struct SpriteBatch<S> {
    region: TextureRegion,
    sprites: Vec<Sprite>,
    instances: Vec<SpriteInstance>,
    storage: S,
}

impl<S: InstanceStorage> SpriteBatch<S> {
    pub fn new(sprites: Vec<Sprite>, region: TextureRegion, mut storage: S) -> Result<Self> {
        let instances = sprites.iter().map(Sprite::instance).collect::<Vec<_>>();
        storage.write_instances(&instances)?;
        Ok(Self {
            region,
            sprites,
            instances,
            storage,
        })
    }

    pub fn region(&self) -> TextureRegion {
        self.region
    }

    pub fn len(&self) -> usize {
        self.sprites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sprites.is_empty()
    }

    pub fn sprites(&self) -> &[Sprite] {
        &self.sprites
    }

    pub fn instances(&self) -> &[SpriteInstance] {
        &self.instances
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn set_scale(&mut self, index: usize, scale: f32) {
        let sprite = &mut self.sprites[index];
        if sprite.scale != scale {
            sprite.scale = scale;
            self.instances[index] = sprite.instance();
        }
    }

    pub fn set_rotation(&mut self, index: usize, rotation: f32) {
        let sprite = &mut self.sprites[index];
        if sprite.rotation != rotation {
            sprite.rotation = rotation;
            self.instances[index] = sprite.instance();
        }
    }

    fn step(&mut self, step: &PhysicsStep, rng: &mut fastrand::Rng) {
        for (sprite, instance) in self.sprites.iter_mut().zip(&mut self.instances) {
            sprite.step(step, rng);
            instance.position = [sprite.x, sprite.y];
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.storage.write_instances(&self.instances)
    }
}

pub struct SpriteBatchManager<S> {
    batches: Vec<SpriteBatch<S>>,
    spawner: SpawnController,
    rng: fastrand::Rng,
    batch_size: usize,
    sprite_count: u64,
}

impl<S: InstanceStorage> SpriteBatchManager<S> {
    pub fn new(batch_size: usize, seed: Option<u64>) -> Result<Self> {
        if batch_size == 0 {
            bail!("Batch size must be at least one sprite.");
        }
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Ok(Self {
            batches: Vec::new(),
            spawner: SpawnController::default(),
            rng,
            batch_size,
            sprite_count: 0,
        })
    }

    pub fn press(&mut self) {
        self.spawner.press();
    }

    pub fn release(&mut self) {
        self.spawner.release();
    }

    pub fn batches(&self) -> &[SpriteBatch<S>] {
        &self.batches
    }

    pub fn batches_mut(&mut self) -> &mut [SpriteBatch<S>] {
        &mut self.batches
    }

    // Total sprites spawned this session; never decreases.
    pub fn sprite_count(&self) -> u64 {
        self.sprite_count
    }

    pub fn spawn_batch<A>(&mut self, allocator: &A) -> Result<()>
    where
        A: InstanceAllocator<Storage = S>,
    {
        let region = self.spawner.region();
        let sprites = (0..self.batch_size)
            .map(|_| Sprite::spawn(region, &mut self.rng))
            .collect::<Vec<_>>();
        let storage = allocator.allocate_instances(sprites.len())?;
        self.batches.push(SpriteBatch::new(sprites, region, storage)?);
        self.sprite_count += self.batch_size as u64;

        log::debug!(
            "Spawned batch #{} ({} sprites, region {}), {} total",
            self.batches.len(),
            self.batch_size,
            region.index(),
            self.sprite_count
        );
        Ok(())
    }

    // Runs spawning and physics for one frame. Returns the number of batches
    // spawned; any non-zero value means recorded draw commands are stale.
    pub fn update<A>(&mut self, dt: f32, bounds: Bounds, allocator: &A) -> Result<u32>
    where
        A: InstanceAllocator<Storage = S>,
    {
        let spawned = self.spawner.tick(dt);
        for _ in 0..spawned {
            self.spawn_batch(allocator)?;
        }

        let step = PhysicsStep::new(dt, bounds);
        for batch in &mut self.batches {
            batch.step(&step, &mut self.rng);
        }

        Ok(spawned)
    }

    pub fn flush(&mut self) -> Result<()> {
        for batch in &mut self.batches {
            batch.flush()?;
        }
        Ok(())
    }

    // Ends the session; storage is released as batches drop
    pub fn clear(&mut self) {
        self.batches.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{MemoryAllocator, MemoryStorage};
    use super::*;

    fn bounds() -> Bounds {
        Bounds::new(800, 600)
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(SpriteBatchManager::<MemoryStorage>::new(0, None).is_err());
    }

    #[test]
    fn press_spawns_one_batch_sized_exactly() {
        let allocator = MemoryAllocator::default();
        let mut manager = SpriteBatchManager::new(16, Some(7)).unwrap();

        manager.press();
        let spawned = manager.update(1.0 / 60.0, bounds(), &allocator).unwrap();

        assert_eq!(spawned, 1);
        assert_eq!(manager.batches().len(), 1);
        assert_eq!(manager.batches()[0].len(), 16);
        assert_eq!(manager.batches()[0].storage().records.len(), 16);
        assert_eq!(manager.sprite_count(), 16);
        assert_eq!(allocator.allocations.get(), 1);
    }

    #[test]
    fn update_without_spawn_reports_nothing_new() {
        let allocator = MemoryAllocator::default();
        let mut manager = SpriteBatchManager::new(4, Some(7)).unwrap();
        manager.press();
        manager.update(0.01, bounds(), &allocator).unwrap();

        let spawned = manager.update(0.01, bounds(), &allocator).unwrap();

        assert_eq!(spawned, 0);
        assert_eq!(manager.sprite_count(), 4);
    }

    #[test]
    fn batches_keep_creation_order_and_region() {
        let allocator = MemoryAllocator::default();
        let mut manager = SpriteBatchManager::new(2, Some(1)).unwrap();

        for _ in 0..3 {
            manager.press();
            manager.update(0.01, bounds(), &allocator).unwrap();
            manager.release();
            manager.update(0.01, bounds(), &allocator).unwrap();
        }

        let regions: Vec<usize> = manager.batches().iter().map(|b| b.region().index()).collect();
        assert_eq!(regions, vec![0, 1, 2]);
        assert!(manager.batches()[1]
            .sprites()
            .iter()
            .all(|sprite| sprite.region.index() == 1));
        assert_eq!(manager.sprite_count(), 6);
    }

    #[test]
    fn flush_writes_current_positions_in_sprite_order() {
        let allocator = MemoryAllocator::default();
        let mut manager = SpriteBatchManager::new(8, Some(3)).unwrap();
        manager.press();
        manager.update(0.0, bounds(), &allocator).unwrap();
        for _ in 0..5 {
            manager.update(1.0 / 60.0, bounds(), &allocator).unwrap();
        }

        manager.flush().unwrap();

        let batch = &manager.batches()[0];
        for (sprite, record) in batch.sprites().iter().zip(&batch.storage().records) {
            assert_eq!(record.position, [sprite.x, sprite.y]);
        }
        // one write at creation plus the flush
        assert_eq!(batch.storage().writes, 2);
    }

    #[test]
    fn identical_seeds_reproduce_trajectories() {
        let run = |seed| {
            let allocator = MemoryAllocator::default();
            let mut manager = SpriteBatchManager::new(32, Some(seed)).unwrap();
            manager.press();
            for dt in [0.016, 0.017, 0.2, 0.05, 0.033, 0.016, 0.4] {
                manager.update(dt, Bounds::new(320, 200), &allocator).unwrap();
            }
            manager
                .batches()
                .iter()
                .flat_map(|batch| batch.sprites().iter())
                .map(|s| (s.x, s.y, s.speed_x, s.speed_y))
                .collect::<Vec<_>>()
        };

        let first = run(99);
        assert_eq!(first, run(99));
        assert_ne!(first, run(100));
    }

    #[test]
    fn allocation_failure_propagates() {
        let allocator = MemoryAllocator {
            fail: true,
            ..Default::default()
        };
        let mut manager = SpriteBatchManager::<MemoryStorage>::new(8, None).unwrap();
        manager.press();

        assert!(manager.update(0.01, bounds(), &allocator).is_err());
        assert_eq!(manager.sprite_count(), 0);
    }

    #[test]
    fn setters_refresh_cached_instance_record() {
        let allocator = MemoryAllocator::default();
        let mut manager = SpriteBatchManager::new(3, Some(5)).unwrap();
        manager.spawn_batch(&allocator).unwrap();

        let batch = &mut manager.batches_mut()[0];
        batch.set_scale(1, 2.0);
        batch.set_rotation(1, 0.0);

        assert_eq!(batch.instances()[1].scale_rotation, [2.0, 0.0, 0.0, 2.0]);
        assert_eq!(batch.sprites()[1].scale, 2.0);
    }

    #[test]
    fn clear_keeps_counter_monotonic() {
        let allocator = MemoryAllocator::default();
        let mut manager = SpriteBatchManager::new(3, Some(5)).unwrap();
        manager.spawn_batch(&allocator).unwrap();
        manager.clear();

        assert!(manager.batches().is_empty());
        assert_eq!(manager.sprite_count(), 3);
    }
}
