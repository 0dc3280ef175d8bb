use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lobby_authority::game::input::PendingInput;
use lobby_authority::game::lobby::LobbyLedger;
use lobby_authority::game::state::{PeerId, World};
use lobby_authority::game::tick::{simulate, FlatGround, MovementConfig};
use lobby_authority::Vec3;

const DT: f32 = 1.0 / 60.0;

fn populated_world(entities: u32, rng: &mut StdRng) -> World {
    let mut world = World::new();
    for peer in 0..entities {
        let id = world.spawn(PeerId(peer + 2));
        if let Some(state) = world.get_mut(id) {
            state.yaw = rng.gen_range(-3.0..3.0);
        }
    }
    world
}

fn bench_tick(c: &mut Criterion) {
    let config = MovementConfig::default();
    let ground = FlatGround::default();
    let mut group = c.benchmark_group("simulate");

    for entities in [8u32, 64, 256] {
        let mut rng = StdRng::seed_from_u64(7);
        let mut world = populated_world(entities, &mut rng);

        group.bench_with_input(BenchmarkId::from_parameter(entities), &entities, |b, _| {
            b.iter(|| {
                for state in world.iter_mut() {
                    let direction = Vec3::new(rng.gen_range(-1.0..1.0), 0.0, rng.gen_range(-1.0..1.0));
                    state.pending = PendingInput::new(direction.normalize_or_zero(), rng.gen_bool(0.05));
                }
                black_box(simulate(&mut world, &config, &ground, DT))
            })
        });
    }
    group.finish();
}

fn bench_lobby_rebuild(c: &mut Criterion) {
    c.bench_function("lobby_ready_toggle_32", |b| {
        let mut ledger = LobbyLedger::new(PeerId::HOST);
        ledger.add_player(PeerId::HOST, true);
        for peer in 2..33 {
            ledger.add_player(PeerId(peer), false);
        }
        let mut ready = false;
        b.iter(|| {
            ready = !ready;
            black_box(ledger.set_ready(PeerId(17), ready))
        })
    });
}

criterion_group!(benches, bench_tick, bench_lobby_rebuild);
criterion_main!(benches);
